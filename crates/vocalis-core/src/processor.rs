//! **TurnProcessor**: one user utterance in, one spoken reply out.
//!
//! A turn locks its session for its whole duration, so turns against the same session id run
//! one after another. The session's own role drives every model call; the role named in the
//! request only seeds sessions that do not exist yet.
//!
//! History is appended only after the call that produced it succeeded. The user message is
//! appended once the input is known to be usable, so a failed completion leaves the user
//! message in place and nothing else.

use crate::audio_store::AudioStore;
use crate::conversation::{ConversationMessage, ConversationStore};
use crate::error::CoreError;
use crate::event_log::{kind, EventLog};
use crate::provider::{AudioUpload, SpeechProvider};
use crate::roles::RoleRegistry;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Validation message for a text turn without a session id or message.
pub const MSG_TEXT_FIELDS_REQUIRED: &str = "sessionId и message обязательны.";
/// Validation message for a request without a session id.
pub const MSG_SESSION_REQUIRED: &str = "sessionId обязателен.";
pub const MSG_TRANSCRIPTION_EMPTY: &str = "Не удалось распознать речь";

/// What the user said this turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio(AudioUpload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReply {
    /// The user message as recorded in history (the transcript for audio turns).
    pub user_message: String,
    pub response_text: String,
    pub audio_url: String,
}

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("{0}")]
    Validation(String),

    #[error("{}", MSG_TRANSCRIPTION_EMPTY)]
    TranscriptionEmpty,

    #[error("Upstream call failed: {0}")]
    Upstream(#[source] CoreError),

    #[error("Storage failed: {0}")]
    Storage(#[source] CoreError),
}

impl TurnError {
    /// True when the client caused the failure and should see the message.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TurnError::Validation(_) | TurnError::TranscriptionEmpty)
    }
}

pub struct TurnProcessor {
    roles: Arc<RoleRegistry>,
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn SpeechProvider>,
    audio: AudioStore,
    events: EventLog,
    history_limit: usize,
}

impl TurnProcessor {
    pub fn new(
        roles: Arc<RoleRegistry>,
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn SpeechProvider>,
        audio: AudioStore,
        events: EventLog,
    ) -> Self {
        Self {
            roles,
            store,
            provider,
            audio,
            events,
            history_limit: 0,
        }
    }

    /// Cap the number of non-system messages sent to completion (0 = whole history).
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Run one turn for `session_id`. `role` only matters when the session is new.
    pub async fn handle(
        &self,
        session_id: &str,
        role: Option<&str>,
        input: TurnInput,
    ) -> Result<TurnReply, TurnError> {
        let requested_role = role.unwrap_or(crate::roles::DEFAULT_ROLE);
        match &input {
            TurnInput::Text(message) => {
                self.events.record(
                    kind::TEXT_MESSAGE_RECEIVED,
                    json!({
                        "sessionId": session_id,
                        "role": requested_role,
                        "messageLength": message.chars().count(),
                    }),
                );
                if session_id.trim().is_empty() || message.trim().is_empty() {
                    return Err(self.reject(session_id, MSG_TEXT_FIELDS_REQUIRED));
                }
            }
            TurnInput::Audio(upload) => {
                self.events.record(
                    kind::VOICE_MESSAGE_RECEIVED,
                    json!({
                        "sessionId": session_id,
                        "role": requested_role,
                        "fileSize": upload.bytes.len(),
                        "mimeType": upload.mime_type,
                    }),
                );
                if session_id.trim().is_empty() {
                    return Err(self.reject(session_id, MSG_SESSION_REQUIRED));
                }
            }
        }

        let seed_role = self.roles.resolve(requested_role);
        let (mut session, created) = self.store.lock(session_id, seed_role).await;
        if created {
            self.events.record(
                kind::NEW_SESSION_CREATED,
                json!({"sessionId": session_id, "role": seed_role.id}),
            );
        }
        let role = self.roles.by_id(session.role);

        let user_message = match input {
            TurnInput::Text(message) => message,
            TurnInput::Audio(upload) => {
                self.events.record(
                    kind::WHISPER_REQUEST_STARTED,
                    json!({"sessionId": session_id}),
                );
                let transcript = self
                    .provider
                    .transcribe(upload, &role.models.transcription)
                    .await
                    .map_err(TurnError::Upstream)?;
                self.events.record(
                    kind::WHISPER_RESPONSE_RECEIVED,
                    json!({
                        "sessionId": session_id,
                        "transcriptionLength": transcript.chars().count(),
                    }),
                );
                if transcript.trim().is_empty() {
                    return Err(TurnError::TranscriptionEmpty);
                }
                transcript
            }
        };

        session
            .messages
            .push(ConversationMessage::user(user_message.clone()));

        self.events.record(
            kind::GPT_REQUEST_STARTED,
            json!({"sessionId": session_id, "model": role.models.chat}),
        );
        let completion = self
            .provider
            .complete(&role.models.chat, &session.history_window(self.history_limit))
            .await
            .map_err(TurnError::Upstream)?;
        self.events.record(
            kind::GPT_RESPONSE_RECEIVED,
            json!({
                "sessionId": session_id,
                "responseLength": completion.text.chars().count(),
                "tokensUsed": completion.usage,
            }),
        );
        session
            .messages
            .push(ConversationMessage::assistant(completion.text.clone()));

        let audio = self
            .provider
            .synthesize(&role.models.voice, &role.voice_type, &completion.text)
            .await
            .map_err(TurnError::Upstream)?;
        self.events
            .record(kind::TTS_RESPONSE_RECEIVED, json!({"sessionId": session_id}));

        let stored = self.audio.persist(&audio).await.map_err(TurnError::Storage)?;
        drop(session);

        self.events.record(
            kind::RESPONSE_SENT,
            json!({
                "sessionId": session_id,
                "transcriptionLength": user_message.chars().count(),
                "responseLength": completion.text.chars().count(),
                "audioGenerated": true,
            }),
        );
        info!("🗣️ Turn complete for session {} ({})", session_id, role.id);

        Ok(TurnReply {
            user_message,
            response_text: completion.text,
            audio_url: stored.url,
        })
    }

    /// Reset the session to a fresh default-role history.
    pub async fn reset_session(&self, session_id: &str) -> Result<(), TurnError> {
        self.events.record(
            kind::CLEAR_HISTORY_REQUESTED,
            json!({"sessionId": session_id}),
        );
        if session_id.trim().is_empty() {
            return Err(self.reject(session_id, MSG_SESSION_REQUIRED));
        }
        self.store
            .reset(session_id, self.roles.default_role())
            .await;
        self.events
            .record(kind::HISTORY_CLEARED, json!({"sessionId": session_id}));
        Ok(())
    }

    /// Log a validation failure and build the matching error.
    pub fn reject(&self, session_id: &str, message: &str) -> TurnError {
        self.events.record(
            kind::VALIDATION_ERROR,
            json!({"sessionId": session_id, "error": message}),
        );
        TurnError::Validation(message.to_string())
    }

    /// Log an unexpected failure with its full cause chain.
    pub fn report_failure(&self, session_id: &str, err: &TurnError) {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        self.events.record(
            kind::SERVER_ERROR,
            json!({"sessionId": session_id, "error": err.to_string(), "chain": chain}),
        );
    }
}
