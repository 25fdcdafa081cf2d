//! Background-noise calibration run at the start of every recording.
//!
//! The calibrator samples the stream's level once per sample period for the length of the
//! calibration window, then sets the noise floor to the mean of those samples plus a fixed
//! margin. A floor belongs to one recording and is never reused.

use crate::energy::{AudioEnergySample, DEFAULT_NOISE_FLOOR_DB};
use crate::error::{VoiceError, VoiceResult};
use crate::recording::{CaptureEvent, CaptureStream};
use std::time::Duration;
use tracing::debug;

/// Speech threshold in dB for one recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseFloor(pub f32);

impl NoiseFloor {
    pub fn db(self) -> f32 {
        self.0
    }
}

impl Default for NoiseFloor {
    fn default() -> Self {
        NoiseFloor(DEFAULT_NOISE_FLOOR_DB)
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// How long to listen before fixing the floor (default: 1000ms)
    pub window: Duration,
    /// Spacing between level samples (default: 100ms)
    pub sample_period: Duration,
    /// Added to the measured mean (default: +10 dB)
    pub margin_db: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1000),
            sample_period: Duration::from_millis(100),
            margin_db: 10.0,
        }
    }
}

/// Shortest accepted sample period; shorter configured periods are raised to it.
pub const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

/// Incremental calibrator fed with the stream's energy samples.
#[derive(Debug)]
pub struct NoiseCalibrator {
    config: CalibrationConfig,
    started_at: Option<Duration>,
    next_sample_at: Duration,
    levels: Vec<f32>,
}

impl NoiseCalibrator {
    pub fn new(mut config: CalibrationConfig) -> Self {
        config.sample_period = config.sample_period.max(MIN_SAMPLE_PERIOD);
        Self {
            config,
            started_at: None,
            next_sample_at: Duration::ZERO,
            levels: Vec::new(),
        }
    }

    /// Feed one energy sample. Returns the floor once the window has elapsed.
    pub fn feed(&mut self, sample: AudioEnergySample) -> Option<NoiseFloor> {
        let start = match self.started_at {
            Some(start) => start,
            None => {
                self.started_at = Some(sample.at);
                self.next_sample_at = sample.at + self.config.sample_period;
                return None;
            }
        };
        if sample.at < self.next_sample_at {
            return None;
        }
        self.levels.push(sample.level_db);
        while self.next_sample_at <= sample.at {
            self.next_sample_at += self.config.sample_period;
        }
        if sample.at.saturating_sub(start) >= self.config.window {
            Some(self.floor())
        } else {
            None
        }
    }

    /// Floor from whatever has been sampled so far; the default floor when nothing was.
    pub fn floor(&self) -> NoiseFloor {
        if self.levels.is_empty() {
            return NoiseFloor::default();
        }
        let mean = self.levels.iter().sum::<f32>() / self.levels.len() as f32;
        NoiseFloor(mean + self.config.margin_db)
    }

    pub fn samples_taken(&self) -> usize {
        self.levels.len()
    }
}

/// Result of a completed calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub floor: NoiseFloor,
    /// Stream time of the sample that completed calibration.
    pub finished_at: Duration,
}

/// Read the stream until calibration completes. Audio chunks seen meanwhile are dropped.
pub async fn calibrate(
    stream: &mut dyn CaptureStream,
    config: CalibrationConfig,
) -> VoiceResult<Calibration> {
    let mut calibrator = NoiseCalibrator::new(config);
    loop {
        match stream.next_event().await {
            Some(CaptureEvent::Energy(sample)) => {
                if let Some(floor) = calibrator.feed(sample) {
                    debug!(
                        "🎚️ Noise floor {:.1} dB from {} samples",
                        floor.db(),
                        calibrator.samples_taken()
                    );
                    return Ok(Calibration {
                        floor,
                        finished_at: sample.at,
                    });
                }
            }
            Some(CaptureEvent::Chunk(_)) => {}
            None => return Err(VoiceError::StreamClosed),
        }
    }
}
