//! Audio energy samples and level metering.
//!
//! A capture stream reports its loudness as a stream of [`AudioEnergySample`]s. Levels are
//! in dB (roughly -100 for silence up to 0 for full scale); timestamps are measured from the
//! moment the stream was opened, so every detector downstream is driven by sample time and
//! never reads a wall clock.

use std::time::Duration;

/// Noise floor used before calibration has produced a measurement.
pub const DEFAULT_NOISE_FLOOR_DB: f32 = -70.0;

/// Level reported for an empty frame.
pub const SILENCE_DB: f32 = -100.0;

/// One loudness measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioEnergySample {
    pub level_db: f32,
    /// Offset from stream start.
    pub at: Duration,
}

impl AudioEnergySample {
    pub fn new(level_db: f32, at: Duration) -> Self {
        Self { level_db, at }
    }

    /// Measure a PCM frame (f32, -1.0..=1.0).
    pub fn from_pcm(samples: &[f32], at: Duration) -> Self {
        Self::new(rms_db(samples), at)
    }
}

/// RMS level of a PCM frame in dBFS.
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-5);
    20.0 * rms.log10()
}

/// Visual scale for a level indicator: 1.0 at or below the floor, up to 1.5 at 50 dB above it.
pub fn level_scale(level_db: f32, noise_floor_db: f32) -> f32 {
    let normalized = ((level_db - noise_floor_db) * 2.0).clamp(0.0, 100.0);
    1.0 + normalized / 100.0 * 0.5
}
