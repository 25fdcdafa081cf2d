//! HTTP client of the relay gateway.
//!
//! [`ChatTransport`] is what the turn controller submits clips through; [`RelayClient`]
//! implements it over reqwest and also covers the text, history and role endpoints.

use crate::error::{VoiceError, VoiceResult};
use crate::recording::RecordingClip;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Client-chosen conversation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// `sess_<unix millis>`
    pub fn generate() -> Self {
        SessionId(format!("sess_{}", chrono::Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceReply {
    pub user_message: String,
    pub response_text: String,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReply {
    pub response_text: String,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleListing {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleModelsDescriptor {
    pub chat: String,
    pub voice: String,
    pub transcription: String,
}

/// Full role configuration as served by `GET /api/roles/:roleId`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDescriptor {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub models: RoleModelsDescriptor,
    pub voice_type: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextRequest<'a> {
    session_id: &'a str,
    message: &'a str,
    role: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClearRequest<'a> {
    session_id: &'a str,
}

/// Where the controller sends finished clips.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_voice(
        &self,
        session: &SessionId,
        role: &str,
        clip: &RecordingClip,
    ) -> VoiceResult<VoiceReply>;

    /// Turn a reply's `audioUrl` into something the player can fetch.
    fn audio_url(&self, reference: &str) -> String {
        reference.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    base: Url,
    client: reqwest::Client,
}

impl RelayClient {
    /// `base_url` is the gateway root, e.g. `http://localhost:3000`.
    pub fn new(base_url: &str) -> VoiceResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| VoiceError::Transport(format!("invalid relay URL '{}': {}", base_url, e)))?;
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> VoiceResult<Url> {
        self.base
            .join(path)
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    /// Absolute URL for a server-relative reference such as `/audio/bot_x.mp3`.
    pub fn resolve(&self, reference: &str) -> VoiceResult<Url> {
        self.endpoint(reference)
    }

    async fn read<T: DeserializeOwned>(res: reqwest::Response) -> VoiceResult<T> {
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(VoiceError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn send_text(
        &self,
        session: &SessionId,
        role: &str,
        message: &str,
    ) -> VoiceResult<TextReply> {
        let res = self
            .client
            .post(self.endpoint("/api/chat/text")?)
            .json(&TextRequest {
                session_id: session.as_str(),
                message,
                role,
            })
            .send()
            .await?;
        Self::read(res).await
    }

    pub async fn clear_history(&self, session: &SessionId) -> VoiceResult<()> {
        let res = self
            .client
            .post(self.endpoint("/api/chat/clear")?)
            .json(&ClearRequest {
                session_id: session.as_str(),
            })
            .send()
            .await?;
        let _: serde_json::Value = Self::read(res).await?;
        Ok(())
    }

    pub async fn list_roles(&self) -> VoiceResult<Vec<RoleListing>> {
        let res = self.client.get(self.endpoint("/api/roles")?).send().await?;
        Self::read(res).await
    }

    /// `Ok(None)` when the relay does not know the role.
    pub async fn fetch_role(&self, role_id: &str) -> VoiceResult<Option<RoleDescriptor>> {
        let res = self
            .client
            .get(self.endpoint(&format!("/api/roles/{}", role_id))?)
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read(res).await.map(Some)
    }
}

#[async_trait]
impl ChatTransport for RelayClient {
    async fn send_voice(
        &self,
        session: &SessionId,
        role: &str,
        clip: &RecordingClip,
    ) -> VoiceResult<VoiceReply> {
        let bytes = clip.bytes();
        debug!("Submitting {} byte clip ({})", bytes.len(), clip.mime_type);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(clip.file_name())
            .mime_str(&clip.mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("sessionId", session.as_str().to_string())
            .part("audio", part)
            .text("role", role.to_string());
        let res = self
            .client
            .post(self.endpoint("/api/chat/voice")?)
            .multipart(form)
            .send()
            .await?;
        Self::read(res).await
    }

    fn audio_url(&self, reference: &str) -> String {
        self.resolve(reference)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| reference.to_string())
    }
}
