//! Language/speech model provider: transcription, chat completion, speech synthesis.
//!
//! [`SpeechProvider`] is the seam the turn processor talks to. [`OpenAiProvider`] speaks the
//! OpenAI-compatible HTTP API. Every call is a single attempt with no retry and no timeout;
//! a non-2xx status becomes [`CoreError::Upstream`] carrying the status and body.

use crate::conversation::ConversationMessage;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Transcription prompt hint for conversational Russian speech.
pub const DEFAULT_TRANSCRIPTION_PROMPT: &str = "Это разговорная русская речь. Ожидается корректное \
распознавание с правильной пунктуацией и числительными. Речь может содержать технические термины и \
имена собственные. При неуверенности в распознавании лучше пропустить слово, чем распознать неверно.";

/// An uploaded audio clip as received from the client.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

/// Token accounting reported by the completion endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Hints sent with every transcription request.
#[derive(Debug, Clone)]
pub struct TranscriptionOptions {
    pub language: String,
    pub prompt: String,
    pub temperature: f32,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language: "ru".to_string(),
            prompt: DEFAULT_TRANSCRIPTION_PROMPT.to_string(),
            temperature: 0.2,
        }
    }
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Speech to text. A blank result is returned as-is; the caller decides what it means.
    async fn transcribe(&self, audio: AudioUpload, model: &str) -> CoreResult<String>;

    async fn complete(&self, model: &str, messages: &[ConversationMessage])
        -> CoreResult<Completion>;

    /// Text to speech; returns encoded audio (mp3).
    async fn synthesize(&self, model: &str, voice: &str, text: &str) -> CoreResult<Vec<u8>>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

/// OpenAI-compatible provider over async reqwest.
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    transcription: TranscriptionOptions,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            transcription: TranscriptionOptions::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_transcription_options(mut self, options: TranscriptionOptions) -> Self {
        self.transcription = options;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(res: reqwest::Response, what: &str) -> CoreResult<reqwest::Response> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(CoreError::Upstream(format!(
            "{} API error {}: {}",
            what, status, body
        )))
    }
}

#[async_trait]
impl SpeechProvider for OpenAiProvider {
    async fn transcribe(&self, audio: AudioUpload, model: &str) -> CoreResult<String> {
        let size = audio.bytes.len();
        let part = reqwest::multipart::Part::bytes(audio.bytes)
            .file_name(audio.file_name)
            .mime_str(&audio.mime_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model.to_string())
            .text("language", self.transcription.language.clone())
            .text("response_format", "text")
            .text("temperature", self.transcription.temperature.to_string())
            .text("prompt", self.transcription.prompt.clone());
        debug!("Transcribing {} bytes with {}", size, model);
        let res = self
            .client
            .post(self.endpoint("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let res = Self::check(res, "Transcription").await?;
        // response_format=text returns the bare transcript.
        Ok(res.text().await?.trim().to_string())
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[ConversationMessage],
    ) -> CoreResult<Completion> {
        let res = self
            .client
            .post(self.endpoint("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest { model, messages })
            .send()
            .await?;
        let res = Self::check(res, "Chat completion").await?;
        let body: ChatResponse = res.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CoreError::Upstream("Chat completion returned no content".into()))?;
        Ok(Completion {
            text,
            usage: body.usage,
        })
    }

    async fn synthesize(&self, model: &str, voice: &str, text: &str) -> CoreResult<Vec<u8>> {
        let res = self
            .client
            .post(self.endpoint("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model,
                voice,
                input: text,
            })
            .send()
            .await?;
        let res = Self::check(res, "Speech").await?;
        Ok(res.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_serializes_history_in_wire_shape() {
        let messages = vec![
            ConversationMessage::system("be brief"),
            ConversationMessage::user("hello"),
        ];
        let json = serde_json::to_value(ChatRequest {
            model: "gpt-4",
            messages: &messages,
        })
        .unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_chat_response_tolerates_missing_usage() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert!(body.usage.is_none());
        assert_eq!(body.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = OpenAiProvider::new("http://localhost:9000/v1/", "key");
        assert_eq!(
            provider.endpoint("/audio/speech"),
            "http://localhost:9000/v1/audio/speech"
        );
    }
}
