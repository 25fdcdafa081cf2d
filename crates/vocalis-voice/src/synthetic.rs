//! Scripted capture device for driving the pipeline without a microphone.
//!
//! A script is a list of constant-level segments. Each acquired stream replays it as energy
//! samples on a fixed frame period plus an encoded chunk every chunk period. With
//! [`SyntheticCaptureBuilder::paced`] the stream waits on the tokio clock between events,
//! which lets tests interleave stop and cancel requests at known stream times.

use crate::energy::AudioEnergySample;
use crate::error::{VoiceError, VoiceResult};
use crate::recording::{AudioChunk, CaptureDevice, CaptureEvent, CaptureStream, MIME_WEBM};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const SILENCE_LEVEL_DB: f32 = -85.0;
pub const SPEECH_LEVEL_DB: f32 = -25.0;

#[derive(Debug, Clone)]
pub struct SyntheticCaptureBuilder {
    segments: Vec<(f32, Duration)>,
    frame_period: Duration,
    chunk_period: Duration,
    mime_type: String,
    paced: bool,
    hold_open: bool,
    failure: Option<String>,
}

impl SyntheticCaptureBuilder {
    pub fn level(mut self, level_db: f32, length: Duration) -> Self {
        self.segments.push((level_db, length));
        self
    }

    pub fn silence(self, length: Duration) -> Self {
        self.level(SILENCE_LEVEL_DB, length)
    }

    pub fn speech(self, length: Duration) -> Self {
        self.level(SPEECH_LEVEL_DB, length)
    }

    pub fn frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Deliver events in tokio time instead of all at once.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Keep the stream open (silent, no events) after the script ends instead of closing it.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Make every acquisition fail with a device access error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn build(self) -> SyntheticCapture {
        SyntheticCapture {
            script: Arc::new(self),
            acquisitions: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn total(&self) -> Duration {
        self.segments.iter().map(|(_, d)| *d).sum()
    }

    fn level_at(&self, at: Duration) -> f32 {
        let mut end = Duration::ZERO;
        for (level, length) in &self.segments {
            end += *length;
            if at < end {
                return *level;
            }
        }
        SILENCE_LEVEL_DB
    }

    fn events(&self) -> VecDeque<CaptureEvent> {
        let total = self.total();
        let mut events = Vec::new();
        let mut at = Duration::ZERO;
        while at < total {
            events.push(CaptureEvent::Energy(AudioEnergySample::new(self.level_at(at), at)));
            at += self.frame_period;
        }
        let mut n: u32 = 1;
        loop {
            let at = self.chunk_period * n;
            if at > total {
                break;
            }
            events.push(CaptureEvent::Chunk(AudioChunk {
                data: vec![(n % 251) as u8; 8],
                at,
            }));
            n += 1;
        }
        // Stable sort keeps an energy sample ahead of a chunk stamped at the same time.
        events.sort_by_key(|e| match e {
            CaptureEvent::Energy(s) => s.at,
            CaptureEvent::Chunk(c) => c.at,
        });
        events.into()
    }
}

/// Cloneable handle; clones share the script and the acquisition counters.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    script: Arc<SyntheticCaptureBuilder>,
    acquisitions: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl SyntheticCapture {
    pub fn builder() -> SyntheticCaptureBuilder {
        SyntheticCaptureBuilder {
            segments: Vec::new(),
            frame_period: Duration::from_millis(16),
            chunk_period: Duration::from_millis(100),
            mime_type: format!("{};codecs=opus", MIME_WEBM),
            paced: false,
            hold_open: false,
            failure: None,
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn acquire(&self) -> VoiceResult<Box<dyn CaptureStream>> {
        if let Some(message) = &self.script.failure {
            return Err(VoiceError::DeviceAccess(message.clone()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            events: self.script.events(),
            mime_type: self.script.mime_type.clone(),
            opened_at: Instant::now(),
            paced: self.script.paced,
            hold_open: self.script.hold_open,
            released: false,
            releases: self.releases.clone(),
        }))
    }
}

struct SyntheticStream {
    events: VecDeque<CaptureEvent>,
    mime_type: String,
    opened_at: Instant,
    paced: bool,
    hold_open: bool,
    released: bool,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureStream for SyntheticStream {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn next_event(&mut self) -> Option<CaptureEvent> {
        if self.released {
            return None;
        }
        let Some(event) = self.events.pop_front() else {
            if self.hold_open {
                std::future::pending::<()>().await;
            }
            return None;
        };
        if self.paced {
            let at = match &event {
                CaptureEvent::Energy(s) => s.at,
                CaptureEvent::Chunk(c) => c.at,
            };
            tokio::time::sleep_until(self.opened_at + at).await;
        }
        Some(event)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_yields_frames_and_chunks_in_order() {
        let device = SyntheticCapture::builder()
            .frame_period(Duration::from_millis(50))
            .silence(Duration::from_millis(200))
            .speech(Duration::from_millis(100))
            .build();
        let mut stream = device.acquire().await.unwrap();
        let mut energy = Vec::new();
        let mut chunks = Vec::new();
        while let Some(event) = stream.next_event().await {
            match event {
                CaptureEvent::Energy(s) => energy.push(s),
                CaptureEvent::Chunk(c) => chunks.push(c.at),
            }
        }
        assert_eq!(energy.len(), 6);
        assert_eq!(energy[3].level_db, SILENCE_LEVEL_DB);
        assert_eq!(energy[4].level_db, SPEECH_LEVEL_DB);
        assert_eq!(
            chunks,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
        stream.release();
        stream.release();
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test]
    async fn test_failing_device_reports_access_error() {
        let device = SyntheticCapture::builder().failing("permission denied").build();
        let err = device.acquire().await.err().unwrap();
        assert!(matches!(err, VoiceError::DeviceAccess(_)));
        assert_eq!(device.acquisitions(), 0);
    }
}
