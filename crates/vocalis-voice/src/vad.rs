//! Energy-based speech activity detection with hysteresis
//!
//! Compares each energy sample against the recording's noise floor. Speech is only confirmed
//! after the level has stayed above the floor for longer than the confirmation time, and the
//! turn only ends after speech has been followed by a silence longer than the silence time.
//! Both comparisons are strict, so a run of exactly the threshold length does not trigger.

use crate::calibrate::NoiseFloor;
use crate::energy::AudioEnergySample;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for speech detection
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Continuous time above the floor before speech is confirmed (default: 300ms)
    pub speech_confirmation: Duration,

    /// Continuous time below the floor after speech that ends the turn (default: 2000ms)
    pub silence_duration: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            speech_confirmation: Duration::from_millis(300),
            silence_duration: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechState {
    Idle,
    /// Above the floor since `since`, not yet confirmed.
    PossiblySpeaking { since: Duration },
    Speaking,
    /// Below the floor since `since` after confirmed speech.
    PossiblySilent { since: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechEvent {
    SpeechStarted { at: Duration },
    EndOfTurn { at: Duration },
}

/// Speech detector for one recording
pub struct SpeechActivityDetector {
    config: DetectorConfig,
    floor: NoiseFloor,
    state: SpeechState,
}

impl SpeechActivityDetector {
    pub fn new(config: DetectorConfig, floor: NoiseFloor) -> Self {
        debug!("🎙️ Speech detector armed at {:.1} dB", floor.db());
        Self {
            config,
            floor,
            state: SpeechState::Idle,
        }
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    pub fn floor(&self) -> NoiseFloor {
        self.floor
    }

    /// True once speech has been confirmed and the turn has not ended.
    pub fn is_speaking(&self) -> bool {
        matches!(
            self.state,
            SpeechState::Speaking | SpeechState::PossiblySilent { .. }
        )
    }

    /// Process one energy sample.
    pub fn process(&mut self, sample: AudioEnergySample) -> Option<SpeechEvent> {
        let above = sample.level_db > self.floor.db();
        let at = sample.at;

        match (self.state, above) {
            (SpeechState::Idle, true) => {
                self.state = SpeechState::PossiblySpeaking { since: at };
                None
            }
            (SpeechState::PossiblySpeaking { since }, true) => {
                if at.saturating_sub(since) > self.config.speech_confirmation {
                    info!("🎤 Speech confirmed at {:?}", at);
                    self.state = SpeechState::Speaking;
                    Some(SpeechEvent::SpeechStarted { at })
                } else {
                    None
                }
            }
            (SpeechState::Speaking, true) => None,
            (SpeechState::PossiblySilent { .. }, true) => {
                self.state = SpeechState::Speaking;
                None
            }

            (SpeechState::Idle, false) => None,
            (SpeechState::PossiblySpeaking { .. }, false) => {
                self.state = SpeechState::Idle;
                None
            }
            (SpeechState::Speaking, false) => {
                self.state = SpeechState::PossiblySilent { since: at };
                None
            }
            (SpeechState::PossiblySilent { since }, false) => {
                if at.saturating_sub(since) > self.config.silence_duration {
                    info!("🔇 End of turn at {:?}", at);
                    self.state = SpeechState::Idle;
                    Some(SpeechEvent::EndOfTurn { at })
                } else {
                    None
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = SpeechState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: NoiseFloor = NoiseFloor(-50.0);

    fn run(
        detector: &mut SpeechActivityDetector,
        level: f32,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<SpeechEvent> {
        (from_ms..to_ms)
            .step_by(10)
            .filter_map(|ms| {
                detector.process(AudioEnergySample::new(level, Duration::from_millis(ms)))
            })
            .collect()
    }

    #[test]
    fn test_short_bursts_never_confirm_speech() {
        let mut detector = SpeechActivityDetector::new(DetectorConfig::default(), FLOOR);
        for cycle in 0..5 {
            let base = cycle * 1000;
            // 300ms above (samples at +0..=+300) then back below.
            assert!(run(&mut detector, -20.0, base, base + 301).is_empty());
            assert!(run(&mut detector, -70.0, base + 310, base + 1000).is_empty());
            assert!(!detector.is_speaking());
        }
    }

    #[test]
    fn test_speech_confirmed_strictly_after_threshold() {
        let mut detector = SpeechActivityDetector::new(DetectorConfig::default(), FLOOR);
        assert!(run(&mut detector, -20.0, 0, 301).is_empty());
        let events = run(&mut detector, -20.0, 310, 320);
        assert_eq!(
            events,
            vec![SpeechEvent::SpeechStarted {
                at: Duration::from_millis(310)
            }]
        );
        assert!(detector.is_speaking());
    }

    #[test]
    fn test_level_equal_to_floor_counts_as_silence() {
        let mut detector = SpeechActivityDetector::new(DetectorConfig::default(), FLOOR);
        assert!(run(&mut detector, -50.0, 0, 2000).is_empty());
        assert_eq!(detector.state(), SpeechState::Idle);
    }

    #[test]
    fn test_end_of_turn_after_long_silence() {
        let mut detector = SpeechActivityDetector::new(DetectorConfig::default(), FLOOR);
        run(&mut detector, -20.0, 0, 500);
        assert!(detector.is_speaking());

        // A pause shorter than the silence duration does not end the turn.
        assert!(run(&mut detector, -70.0, 500, 2500).is_empty());
        run(&mut detector, -20.0, 2500, 2600);
        assert_eq!(detector.state(), SpeechState::Speaking);

        let events = run(&mut detector, -70.0, 2600, 5000);
        assert_eq!(
            events,
            vec![SpeechEvent::EndOfTurn {
                at: Duration::from_millis(4610)
            }]
        );
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_silence_without_speech_never_ends_turn() {
        let mut detector = SpeechActivityDetector::new(DetectorConfig::default(), FLOOR);
        assert!(run(&mut detector, -70.0, 0, 10_000).is_empty());
    }
}
