//! Turn controller
//!
//! Drives one conversational turn end to end: acquire the capture device, calibrate the noise
//! floor, wait for speech (ambient mode) or record straight away (push-to-talk), finalize the
//! clip, submit it to the relay and play the reply. Every stage listens for stop and cancel
//! requests sent through a [`ControllerHandle`].

use crate::calibrate::{calibrate, CalibrationConfig};
use crate::client::{ChatTransport, SessionId, VoiceReply};
use crate::energy::level_scale;
use crate::error::VoiceError;
use crate::playback::Player;
use crate::recording::{CaptureDevice, CaptureEvent, RecordingConfig, RecordingSession};
use crate::turn::{TurnMachine, TurnMode, TurnState, TurnTrigger};
use crate::vad::{DetectorConfig, SpeechActivityDetector, SpeechEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Latest request from the user side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    /// Finish the recording and submit what was captured.
    Stop,
    /// Abandon the turn, whatever stage it is in.
    Cancel,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub mode: TurnMode,
    /// Role sent along with every clip.
    pub role: String,
    pub calibration: CalibrationConfig,
    pub detector: DetectorConfig,
    pub recording: RecordingConfig,
    /// Pause between playback ending and the next ambient turn (default: 100ms)
    pub restart_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: TurnMode::Ambient,
            role: "default".to_string(),
            calibration: CalibrationConfig::default(),
            detector: DetectorConfig::default(),
            recording: RecordingConfig::default(),
            restart_delay: Duration::from_millis(100),
        }
    }
}

/// Progress reported to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged(TurnState),
    Level { level_db: f32, scale: f32 },
    Reply(VoiceReply),
    ClipDiscarded { duration: Duration },
    Failed(String),
}

#[derive(Debug)]
pub enum TurnOutcome {
    Replied(VoiceReply),
    Discarded,
    Cancelled,
    Failed(VoiceError),
}

/// Cloneable remote for stopping or cancelling the running turn.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    signal: Arc<watch::Sender<ControlSignal>>,
}

impl ControllerHandle {
    pub fn stop(&self) {
        self.signal.send_if_modified(|current| {
            if *current == ControlSignal::Run {
                *current = ControlSignal::Stop;
                true
            } else {
                false
            }
        });
    }

    pub fn cancel(&self) {
        self.signal.send_replace(ControlSignal::Cancel);
    }
}

/// Resolves with the pending stop or cancel request.
async fn interrupted(rx: &mut watch::Receiver<ControlSignal>) -> ControlSignal {
    loop {
        let current = *rx.borrow_and_update();
        if current != ControlSignal::Run {
            return current;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves once cancellation is requested; stop requests are ignored.
async fn cancelled(rx: &mut watch::Receiver<ControlSignal>) {
    loop {
        if *rx.borrow_and_update() == ControlSignal::Cancel {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Step {
    Signal(ControlSignal),
    Capture(Option<CaptureEvent>),
}

pub struct TurnController {
    config: ControllerConfig,
    session: SessionId,
    machine: TurnMachine,
    device: Arc<dyn CaptureDevice>,
    transport: Arc<dyn ChatTransport>,
    player: Arc<dyn Player>,
    signal_tx: Arc<watch::Sender<ControlSignal>>,
    signal_rx: watch::Receiver<ControlSignal>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl TurnController {
    pub fn new(
        config: ControllerConfig,
        session: SessionId,
        device: Arc<dyn CaptureDevice>,
        transport: Arc<dyn ChatTransport>,
        player: Arc<dyn Player>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (signal_tx, signal_rx) = watch::channel(ControlSignal::Run);
        let (events, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            machine: TurnMachine::new(config.mode),
            config,
            session,
            device,
            transport,
            player,
            signal_tx: Arc::new(signal_tx),
            signal_rx,
            events,
        };
        (controller, events_rx)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            signal: self.signal_tx.clone(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.machine.state()
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn transition(&mut self, trigger: TurnTrigger) {
        match self.machine.apply(trigger) {
            Some(state) => {
                debug!("Turn {:?} -> {}", trigger, state);
                self.emit(ControllerEvent::StateChanged(state));
            }
            None => warn!(
                "Ignoring {:?} in state {}",
                trigger,
                self.machine.state()
            ),
        }
    }

    fn fail(&mut self, trigger: TurnTrigger, err: VoiceError) -> TurnOutcome {
        error!("❌ Turn failed: {}", err);
        self.emit(ControllerEvent::Failed(err.to_string()));
        self.transition(trigger);
        TurnOutcome::Failed(err)
    }

    fn clear_stop(&self) {
        self.signal_tx.send_if_modified(|current| {
            if *current == ControlSignal::Stop {
                *current = ControlSignal::Run;
                true
            } else {
                false
            }
        });
    }

    /// Run turns until one ends without an automatic restart.
    pub async fn run(&mut self) -> TurnOutcome {
        loop {
            let outcome = self.run_turn().await;
            if self.machine.state() != TurnState::Calibrating {
                return outcome;
            }
            tokio::select! {
                biased;
                _ = cancelled(&mut self.signal_rx) => {
                    self.transition(TurnTrigger::Cancel);
                    return TurnOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }
        }
    }

    /// Run one turn. Starts from idle, or continues an ambient restart already calibrating.
    pub async fn run_turn(&mut self) -> TurnOutcome {
        match self.machine.state() {
            TurnState::Idle => {
                self.signal_tx.send_replace(ControlSignal::Run);
                let _ = self.signal_rx.borrow_and_update();
                self.transition(TurnTrigger::Start);
            }
            TurnState::Calibrating => {}
            abandoned => {
                // The previous turn's future was dropped mid-flight; its capture session
                // went with it, but playback and the machine still need resetting.
                warn!("Tearing down abandoned turn in state {}", abandoned);
                self.player.stop();
                self.transition(TurnTrigger::Cancel);
                self.signal_tx.send_replace(ControlSignal::Run);
                let _ = self.signal_rx.borrow_and_update();
                self.transition(TurnTrigger::Start);
            }
        }

        let device = self.device.clone();
        let started = RecordingSession::start(device.as_ref(), self.config.recording.clone()).await;
        let mut session = match started {
            Ok(session) => session,
            Err(e) => return self.fail(TurnTrigger::Cancel, e),
        };

        let calibration = {
            let calibrating = calibrate(session.stream_mut(), self.config.calibration.clone());
            tokio::pin!(calibrating);
            tokio::select! {
                biased;
                signal = interrupted(&mut self.signal_rx) => Err(signal),
                result = &mut calibrating => Ok(result),
            }
        };
        let calibration = match calibration {
            Ok(Ok(calibration)) => calibration,
            Ok(Err(e)) => return self.fail(TurnTrigger::Cancel, e),
            Err(ControlSignal::Cancel) => {
                info!("🛑 Turn cancelled during calibration");
                self.transition(TurnTrigger::Cancel);
                return TurnOutcome::Cancelled;
            }
            Err(_) => {
                info!("Stop requested during calibration; nothing recorded");
                self.clear_stop();
                self.transition(TurnTrigger::Cancel);
                self.emit(ControllerEvent::ClipDiscarded {
                    duration: Duration::ZERO,
                });
                return TurnOutcome::Discarded;
            }
        };
        self.transition(TurnTrigger::Calibrated);
        session.begin(calibration.finished_at);

        let floor = calibration.floor;
        let mut detector = SpeechActivityDetector::new(self.config.detector.clone(), floor);
        let mut last_at = calibration.finished_at;
        let end_at = loop {
            let step = tokio::select! {
                biased;
                signal = interrupted(&mut self.signal_rx) => Step::Signal(signal),
                event = session.next_event() => Step::Capture(event),
            };
            match step {
                Step::Signal(ControlSignal::Cancel) => {
                    info!("🛑 Turn cancelled while listening");
                    self.transition(TurnTrigger::Cancel);
                    return TurnOutcome::Cancelled;
                }
                Step::Signal(ControlSignal::Stop) => {
                    self.clear_stop();
                    self.transition(TurnTrigger::StopRequested);
                    break last_at;
                }
                Step::Signal(ControlSignal::Run) => {}
                Step::Capture(Some(CaptureEvent::Energy(sample))) => {
                    last_at = sample.at;
                    self.emit(ControllerEvent::Level {
                        level_db: sample.level_db,
                        scale: level_scale(sample.level_db, floor.db()),
                    });
                    if self.machine.mode() != TurnMode::Ambient {
                        continue;
                    }
                    match detector.process(sample) {
                        Some(SpeechEvent::SpeechStarted { .. })
                            if self.machine.state() == TurnState::AwaitingSpeech =>
                        {
                            self.transition(TurnTrigger::SpeechConfirmed);
                        }
                        Some(SpeechEvent::EndOfTurn { at })
                            if self.machine.state() == TurnState::Recording =>
                        {
                            self.transition(TurnTrigger::EndOfTurn);
                            break at;
                        }
                        _ => {}
                    }
                }
                Step::Capture(Some(CaptureEvent::Chunk(chunk))) => {
                    last_at = last_at.max(chunk.at);
                    session.append_chunk(chunk);
                }
                Step::Capture(None) => {
                    debug!("Capture stream ended at {:?}", last_at);
                    self.transition(TurnTrigger::StopRequested);
                    break last_at;
                }
            }
        };

        let recorded = session.duration_at(end_at);
        let Some(clip) = session.stop(end_at) else {
            self.transition(TurnTrigger::ClipDiscarded);
            self.emit(ControllerEvent::ClipDiscarded { duration: recorded });
            return TurnOutcome::Discarded;
        };
        self.transition(TurnTrigger::ClipAccepted);
        info!("📤 Submitting {:?} clip", clip.duration);

        let transport = self.transport.clone();
        let reply = {
            let sending = transport.send_voice(&self.session, &self.config.role, &clip);
            tokio::pin!(sending);
            tokio::select! {
                biased;
                _ = cancelled(&mut self.signal_rx) => None,
                result = &mut sending => Some(result),
            }
        };
        let reply = match reply {
            None => {
                info!("🛑 Turn cancelled while waiting for the reply");
                self.transition(TurnTrigger::Cancel);
                return TurnOutcome::Cancelled;
            }
            Some(Err(e)) => return self.fail(TurnTrigger::ReplyFailed, e),
            Some(Ok(reply)) => reply,
        };
        self.emit(ControllerEvent::Reply(reply.clone()));

        let Some(reference) = reply.audio_url.as_deref() else {
            self.transition(TurnTrigger::ReplySilent);
            return TurnOutcome::Replied(reply);
        };
        self.transition(TurnTrigger::ReplyReceived);
        let url = transport.audio_url(reference);
        let player = self.player.clone();
        let played = {
            let playing = player.play(&url);
            tokio::pin!(playing);
            tokio::select! {
                biased;
                _ = cancelled(&mut self.signal_rx) => None,
                result = &mut playing => Some(result),
            }
        };
        match played {
            None => {
                player.stop();
                info!("🛑 Playback cancelled");
                self.transition(TurnTrigger::Cancel);
                TurnOutcome::Cancelled
            }
            Some(Ok(())) => {
                self.transition(TurnTrigger::PlaybackFinished);
                TurnOutcome::Replied(reply)
            }
            Some(Err(e)) => self.fail(TurnTrigger::PlaybackFailed, e),
        }
    }
}
