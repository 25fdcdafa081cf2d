//! # Vocalis Voice - client side of the voice relay
//!
//! Everything a client needs to hold a spoken conversation with the relay gateway: noise-floor
//! calibration, energy-based speech detection, recording, the turn-taking state machine and
//! the HTTP client that submits clips and fetches replies.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Turn Controller                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   Capture    │→ │ Calibration  │→ │ Speech       │      │
//! │  │   Stream     │  │ (noise floor)│  │ Detector     │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         ↓                                     ↓             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   Player     │← │ Relay Client │← │ Recording    │      │
//! │  │  (rodio)     │  │  (reqwest)   │  │ Clip         │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod calibrate;
pub mod client;
pub mod controller;
pub mod energy;
pub mod error;
pub mod playback;
pub mod recording;
pub mod synthetic;
pub mod turn;
pub mod vad;

pub use calibrate::{calibrate, Calibration, CalibrationConfig, NoiseCalibrator, NoiseFloor};
pub use client::{
    ChatTransport, RelayClient, RoleDescriptor, RoleListing, RoleModelsDescriptor, SessionId,
    TextReply, VoiceReply,
};
pub use controller::{
    ControlSignal, ControllerConfig, ControllerEvent, ControllerHandle, TurnController,
    TurnOutcome,
};
pub use energy::{level_scale, rms_db, AudioEnergySample};
pub use error::{VoiceError, VoiceResult};
#[cfg(feature = "playback")]
pub use playback::RodioPlayer;
pub use playback::{Player, SilentPlayer};
pub use recording::{
    AudioChunk, CaptureDevice, CaptureEvent, CaptureStream, RecordingClip, RecordingConfig,
    RecordingSession,
};
pub use synthetic::{SyntheticCapture, SyntheticCaptureBuilder};
pub use turn::{TurnMachine, TurnMode, TurnState, TurnTrigger};
pub use vad::{DetectorConfig, SpeechActivityDetector, SpeechEvent, SpeechState};
