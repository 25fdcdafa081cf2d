//! Turn-taking state machine for the client
//!
//! Pure transition table over the states of one conversational turn. The controller feeds it
//! triggers and acts on the state it lands in; a trigger that makes no sense in the current
//! state is rejected and leaves the state unchanged.

use serde::Serialize;
use std::fmt;

/// How turns are started and ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Embedded widget: listens for speech, ends on silence, restarts after each reply.
    Ambient,
    /// Explicit start/stop by the user; records immediately and never auto-restarts.
    PushToTalk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Calibrating,
    AwaitingSpeech,
    Recording,
    Finalizing,
    Submitting,
    Playing,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Calibrating => "calibrating",
            TurnState::AwaitingSpeech => "awaiting_speech",
            TurnState::Recording => "recording",
            TurnState::Finalizing => "finalizing",
            TurnState::Submitting => "submitting",
            TurnState::Playing => "playing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTrigger {
    /// User start or auto-restart.
    Start,
    Calibrated,
    SpeechConfirmed,
    EndOfTurn,
    StopRequested,
    ClipAccepted,
    ClipDiscarded,
    /// Reply arrived with playable audio.
    ReplyReceived,
    /// Reply arrived without audio.
    ReplySilent,
    ReplyFailed,
    PlaybackFinished,
    PlaybackFailed,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct TurnMachine {
    mode: TurnMode,
    state: TurnState,
}

impl TurnMachine {
    pub fn new(mode: TurnMode) -> Self {
        Self {
            mode,
            state: TurnState::Idle,
        }
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Target state for `trigger`, or `None` when the trigger is not valid here.
    pub fn next(&self, trigger: TurnTrigger) -> Option<TurnState> {
        use TurnState::*;
        use TurnTrigger::*;

        if trigger == Cancel {
            return Some(Idle);
        }
        let next = match (self.state, trigger) {
            (Idle, Start) => Calibrating,
            (Calibrating, Calibrated) => match self.mode {
                TurnMode::Ambient => AwaitingSpeech,
                TurnMode::PushToTalk => Recording,
            },
            (AwaitingSpeech, SpeechConfirmed) => Recording,
            // Stop before any speech still finalizes; the clip is then judged on length.
            (AwaitingSpeech, StopRequested) => Finalizing,
            (Recording, EndOfTurn) | (Recording, StopRequested) => Finalizing,
            (Finalizing, ClipAccepted) => Submitting,
            (Finalizing, ClipDiscarded) => Idle,
            (Submitting, ReplyReceived) => Playing,
            (Submitting, ReplySilent) | (Submitting, ReplyFailed) => Idle,
            (Playing, PlaybackFinished) => match self.mode {
                TurnMode::Ambient => Calibrating,
                TurnMode::PushToTalk => Idle,
            },
            (Playing, PlaybackFailed) => Idle,
            _ => return None,
        };
        Some(next)
    }

    /// Apply `trigger`; returns the new state, or `None` (state unchanged) when invalid.
    pub fn apply(&mut self, trigger: TurnTrigger) -> Option<TurnState> {
        let next = self.next(trigger)?;
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TurnTrigger::*;

    fn drive(mode: TurnMode, triggers: &[TurnTrigger]) -> Vec<TurnState> {
        let mut machine = TurnMachine::new(mode);
        triggers
            .iter()
            .map(|t| machine.apply(*t).expect("valid transition"))
            .collect()
    }

    #[test]
    fn test_ambient_turn_restarts_after_playback() {
        let states = drive(
            TurnMode::Ambient,
            &[
                Start,
                Calibrated,
                SpeechConfirmed,
                EndOfTurn,
                ClipAccepted,
                ReplyReceived,
                PlaybackFinished,
            ],
        );
        assert_eq!(
            states,
            vec![
                TurnState::Calibrating,
                TurnState::AwaitingSpeech,
                TurnState::Recording,
                TurnState::Finalizing,
                TurnState::Submitting,
                TurnState::Playing,
                TurnState::Calibrating,
            ]
        );
    }

    #[test]
    fn test_push_to_talk_skips_awaiting_speech_and_ends_idle() {
        let states = drive(
            TurnMode::PushToTalk,
            &[
                Start,
                Calibrated,
                StopRequested,
                ClipAccepted,
                ReplyReceived,
                PlaybackFinished,
            ],
        );
        assert_eq!(states[1], TurnState::Recording);
        assert_eq!(*states.last().unwrap(), TurnState::Idle);
    }

    #[test]
    fn test_cancel_from_any_state_goes_idle() {
        for prefix in 0..6 {
            let mut machine = TurnMachine::new(TurnMode::Ambient);
            for trigger in [Start, Calibrated, SpeechConfirmed, EndOfTurn, ClipAccepted, ReplyReceived]
                .iter()
                .take(prefix)
            {
                machine.apply(*trigger).unwrap();
            }
            assert_eq!(machine.apply(Cancel), Some(TurnState::Idle));
        }
    }

    #[test]
    fn test_invalid_trigger_keeps_state() {
        let mut machine = TurnMachine::new(TurnMode::Ambient);
        assert_eq!(machine.apply(EndOfTurn), None);
        assert_eq!(machine.state(), TurnState::Idle);

        machine.apply(Start).unwrap();
        machine.apply(Calibrated).unwrap();
        assert_eq!(machine.apply(ClipAccepted), None);
        assert_eq!(machine.state(), TurnState::AwaitingSpeech);
    }

    #[test]
    fn test_discarded_clip_returns_to_idle() {
        let states = drive(
            TurnMode::Ambient,
            &[Start, Calibrated, SpeechConfirmed, StopRequested, ClipDiscarded],
        );
        assert_eq!(*states.last().unwrap(), TurnState::Idle);
    }
}
