//! Route handlers.

use crate::{ApiError, AppState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use vocalis_core::processor::{MSG_SESSION_REQUIRED, MSG_TEXT_FIELDS_REQUIRED};
use vocalis_core::{AudioUpload, Role, RoleSummary, TurnInput, TurnReply};

pub const MSG_AUDIO_REQUIRED: &str = "Файл audio обязателен.";
pub const MSG_UNSUPPORTED_AUDIO: &str = "Только WebM и MP3 файлы разрешены";
pub const MSG_ROLE_NOT_FOUND: &str = "Роль не найдена";

/// Upload types accepted for voice turns, compared without MIME parameters.
const ACCEPTED_AUDIO: &[&str] = &["audio/webm", "audio/mp3"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearRequest {
    #[serde(default)]
    session_id: String,
}

pub async fn health() -> &'static str {
    "OK"
}

/// POST /api/chat/text
pub async fn chat_text(
    State(state): State<AppState>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| {
        tracing::debug!("Rejected text body: {}", e);
        ApiError::BadRequest(MSG_TEXT_FIELDS_REQUIRED.to_string())
    })?;
    let reply = state
        .processor
        .handle(
            &body.session_id,
            body.role.as_deref(),
            TurnInput::Text(body.message),
        )
        .await
        .map_err(|e| state.turn_failure(&body.session_id, e))?;
    Ok(Json(json!({
        "responseText": reply.response_text,
        "audioUrl": reply.audio_url,
    })))
}

fn accepted_audio(mime_type: &str) -> bool {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    ACCEPTED_AUDIO
        .iter()
        .any(|accepted| base.eq_ignore_ascii_case(accepted))
}

/// POST /api/chat/voice (multipart: `audio`, `sessionId`, optional `role`)
pub async fn chat_voice(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<TurnReply>, ApiError> {
    let mut session_id = String::new();
    let mut role = None;
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "sessionId" => {
                session_id = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            }
            "role" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                role = Some(value).filter(|r| !r.trim().is_empty());
            }
            "audio" => {
                let mime_type = field.content_type().unwrap_or_default().to_string();
                if !accepted_audio(&mime_type) {
                    let err = state.processor.reject(&session_id, MSG_UNSUPPORTED_AUDIO);
                    return Err(state.turn_failure(&session_id, err));
                }
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "voice_message.webm".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                upload = Some(AudioUpload {
                    bytes: bytes.to_vec(),
                    file_name,
                    mime_type,
                });
            }
            _ => {}
        }
    }

    if session_id.trim().is_empty() {
        let err = state.processor.reject(&session_id, MSG_SESSION_REQUIRED);
        return Err(state.turn_failure(&session_id, err));
    }
    let Some(upload) = upload else {
        let err = state.processor.reject(&session_id, MSG_AUDIO_REQUIRED);
        return Err(state.turn_failure(&session_id, err));
    };

    let reply = state
        .processor
        .handle(&session_id, role.as_deref(), TurnInput::Audio(upload))
        .await
        .map_err(|e| state.turn_failure(&session_id, e))?;
    Ok(Json(reply))
}

/// POST /api/chat/clear
pub async fn clear_history(
    State(state): State<AppState>,
    body: Result<Json<ClearRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    state
        .processor
        .reset_session(&body.session_id)
        .await
        .map_err(|e| state.turn_failure(&body.session_id, e))?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/roles
pub async fn list_roles(State(state): State<AppState>) -> Json<Vec<RoleSummary>> {
    Json(state.processor.roles().summaries())
}

/// GET /api/roles/:role_id
pub async fn get_role(
    State(state): State<AppState>,
    Path(role_id): Path<String>,
) -> Result<Json<Role>, ApiError> {
    state
        .processor
        .roles()
        .get(&role_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(MSG_ROLE_NOT_FOUND.to_string()))
}
