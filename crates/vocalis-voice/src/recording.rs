//! Capture device seam and the per-recording session that owns a stream.
//!
//! A [`CaptureDevice`] hands out one [`CaptureStream`] at a time. The stream yields energy
//! samples and encoded audio chunks (webm/opus or mp3; encoding happens inside the device).
//! [`RecordingSession`] owns the stream for one recording, buffers the chunks captured after
//! recording begins and releases the device when dropped.

use crate::error::VoiceResult;
use crate::energy::AudioEnergySample;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub const MIME_WEBM: &str = "audio/webm";
pub const MIME_MP3: &str = "audio/mp3";

/// Encoded audio produced by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    /// Offset from stream start.
    pub at: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Energy(AudioEnergySample),
    Chunk(AudioChunk),
}

#[async_trait]
pub trait CaptureStream: Send {
    /// MIME type of the chunks, e.g. `audio/webm;codecs=opus`.
    fn mime_type(&self) -> &str;

    /// Next sample or chunk; `None` once the stream has ended.
    async fn next_event(&mut self) -> Option<CaptureEvent>;

    /// Stop capturing and give the device back. Must be safe to call more than once.
    fn release(&mut self);
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open a new stream. Fails with `VoiceError::DeviceAccess` when the device is unavailable.
    async fn acquire(&self) -> VoiceResult<Box<dyn CaptureStream>>;
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Clips shorter than this are discarded (default: 500ms)
    pub min_duration: Duration,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_millis(500),
        }
    }
}

/// A finished recording ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingClip {
    pub chunks: Vec<AudioChunk>,
    pub mime_type: String,
    pub duration: Duration,
}

impl RecordingClip {
    /// Concatenated chunk payloads.
    pub fn bytes(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.data.iter().copied()).collect()
    }

    /// Upload file name matching the MIME type.
    pub fn file_name(&self) -> &'static str {
        if self.mime_type.contains("mp3") || self.mime_type.contains("mpeg") {
            "voice_message.mp3"
        } else {
            "voice_message.webm"
        }
    }

    /// MIME type without codec parameters.
    pub fn base_mime_type(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or(&self.mime_type)
            .trim()
    }
}

/// One recording: owns the capture stream until it is stopped or dropped.
pub struct RecordingSession {
    config: RecordingConfig,
    stream: Box<dyn CaptureStream>,
    started_at: Option<Duration>,
    chunks: Vec<AudioChunk>,
}

impl RecordingSession {
    /// Acquire the device and open a session. Nothing is buffered until [`begin`](Self::begin).
    pub async fn start(device: &dyn CaptureDevice, config: RecordingConfig) -> VoiceResult<Self> {
        let stream = device.acquire().await?;
        info!("🎙️ Capture stream opened ({})", stream.mime_type());
        Ok(Self::with_stream(stream, config))
    }

    pub fn with_stream(stream: Box<dyn CaptureStream>, config: RecordingConfig) -> Self {
        Self {
            config,
            stream,
            started_at: None,
            chunks: Vec::new(),
        }
    }

    pub fn stream_mut(&mut self) -> &mut dyn CaptureStream {
        self.stream.as_mut()
    }

    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.stream.next_event().await
    }

    /// Start buffering chunks from stream time `at`.
    pub fn begin(&mut self, at: Duration) {
        debug!("Recording from {:?}", at);
        self.started_at = Some(at);
        self.chunks.clear();
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    /// Buffer a chunk. Chunks produced before recording began are dropped.
    pub fn append_chunk(&mut self, chunk: AudioChunk) {
        match self.started_at {
            Some(start) if chunk.at >= start && !chunk.data.is_empty() => self.chunks.push(chunk),
            _ => {}
        }
    }

    /// Elapsed recording time at stream time `at`.
    pub fn duration_at(&self, at: Duration) -> Duration {
        self.started_at
            .map(|start| at.saturating_sub(start))
            .unwrap_or_default()
    }

    /// Stop at stream time `at` and release the device. `None` means the clip was discarded:
    /// recording never began, it is shorter than the minimum, or no audio arrived.
    pub fn stop(mut self, at: Duration) -> Option<RecordingClip> {
        self.stream.release();
        let duration = self.duration_at(at);
        if self.started_at.is_none() || duration < self.config.min_duration {
            info!("🗑️ Discarding {:?} clip (minimum {:?})", duration, self.config.min_duration);
            return None;
        }
        if self.chunks.is_empty() {
            info!("🗑️ Discarding clip without audio data");
            return None;
        }
        Some(RecordingClip {
            chunks: std::mem::take(&mut self.chunks),
            mime_type: self.stream.mime_type().to_string(),
            duration,
        })
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.stream.release();
    }
}
