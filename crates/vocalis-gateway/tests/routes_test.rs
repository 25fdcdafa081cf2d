//! HTTP surface driven through `tower::ServiceExt::oneshot` with a scripted provider.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use vocalis_core::{
    AudioStore, AudioUpload, Completion, ConversationMessage, ConversationStore, CoreError,
    CoreResult, EventLog, InMemoryConversationStore, RoleRegistry, SpeechProvider,
    TurnProcessor,
};
use vocalis_gateway::{build_app, AppState};

const BOUNDARY: &str = "vocalis-test-boundary";

#[derive(Default)]
struct ScriptedProvider {
    transcript: String,
    fail_completion: bool,
}

#[async_trait]
impl SpeechProvider for ScriptedProvider {
    async fn transcribe(&self, _audio: AudioUpload, _model: &str) -> CoreResult<String> {
        Ok(self.transcript.clone())
    }

    async fn complete(
        &self,
        _model: &str,
        messages: &[ConversationMessage],
    ) -> CoreResult<Completion> {
        if self.fail_completion {
            return Err(CoreError::Upstream(
                "Chat completion API error 503: overloaded".into(),
            ));
        }
        Ok(Completion {
            text: format!("reply to {} messages", messages.len()),
            usage: None,
        })
    }

    async fn synthesize(&self, _model: &str, _voice: &str, _text: &str) -> CoreResult<Vec<u8>> {
        Ok(b"ID3fake".to_vec())
    }
}

struct TestApp {
    app: Router,
    store: Arc<InMemoryConversationStore>,
    events: EventLog,
    _dir: tempfile::TempDir,
}

fn test_app(provider: ScriptedProvider) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let public = dir.path().join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "<h1>Vocalis</h1>").unwrap();

    let audio = AudioStore::open(dir.path().join("temp")).unwrap();
    let events = EventLog::open(dir.path().join("logs")).unwrap();
    let store = Arc::new(InMemoryConversationStore::new());
    let processor = TurnProcessor::new(
        Arc::new(RoleRegistry::builtin()),
        store.clone(),
        Arc::new(provider),
        audio.clone(),
        events.clone(),
    );
    let app = build_app(AppState::new(processor), &public, audio.dir());
    TestApp {
        app,
        store,
        events,
        _dir: dir,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn post_multipart(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        name, value
                    )
                    .as_bytes(),
                );
            }
            Part::File(name, mime, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"voice_message.webm\"\r\nContent-Type: {}\r\n\r\n",
                        name, mime
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    Request::builder()
        .method("POST")
        .uri("/api/chat/voice")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_and_static_client() {
    let t = test_app(ScriptedProvider::default());

    let (status, body) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    let (status, body) = send(&t.app, get("/index.html")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>Vocalis</h1>");
}

#[tokio::test]
async fn test_text_turn_returns_reply_and_serves_audio() {
    let t = test_app(ScriptedProvider::default());

    let (status, json) = send_json(
        &t.app,
        post_json(
            "/api/chat/text",
            json!({"sessionId": "sess_1", "message": "Привет", "role": "tech"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // System prompt plus the new user message.
    assert_eq!(json["responseText"], "reply to 2 messages");
    let audio_url = json["audioUrl"].as_str().unwrap().to_string();
    assert!(audio_url.starts_with("/audio/bot_"));
    assert!(audio_url.ends_with(".mp3"));

    let (status, body) = send(&t.app, get(&audio_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ID3fake");

    let state = t.store.snapshot("sess_1").await.unwrap();
    assert_eq!(state.messages.len(), 3);
}

#[tokio::test]
async fn test_text_turn_validation() {
    let t = test_app(ScriptedProvider::default());

    let (status, json) = send_json(
        &t.app,
        post_json("/api/chat/text", json!({"sessionId": "sess_1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "sessionId и message обязательны.");

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/chat/text")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send_json(&t.app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "sessionId и message обязательны.");
    assert!(t.store.snapshot("sess_1").await.is_none());
}

#[tokio::test]
async fn test_voice_turn_accepts_fields_in_any_order() {
    let t = test_app(ScriptedProvider {
        transcript: "Какая погода?".into(),
        ..Default::default()
    });

    let req = post_multipart(&[
        Part::Text("role", "friendly"),
        Part::File("audio", "audio/webm;codecs=opus", b"\x1a\x45\xdf\xa3"),
        Part::Text("sessionId", "sess_voice"),
    ]);
    let (status, json) = send_json(&t.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["userMessage"], "Какая погода?");
    assert_eq!(json["responseText"], "reply to 2 messages");
    assert!(json["audioUrl"].as_str().unwrap().starts_with("/audio/"));

    let state = t.store.snapshot("sess_voice").await.unwrap();
    assert_eq!(state.role.as_str(), "friendly");
}

#[tokio::test]
async fn test_voice_turn_rejections() {
    let t = test_app(ScriptedProvider {
        transcript: "текст".into(),
        ..Default::default()
    });

    let (status, json) = send_json(
        &t.app,
        post_multipart(&[
            Part::Text("sessionId", "sess_1"),
            Part::File("audio", "audio/wav", b"RIFF"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Только WebM и MP3 файлы разрешены");

    let (status, json) = send_json(
        &t.app,
        post_multipart(&[Part::File("audio", "audio/mp3", b"ID3")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "sessionId обязателен.");

    let (status, json) = send_json(
        &t.app,
        post_multipart(&[Part::Text("sessionId", "sess_1")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Файл audio обязателен.");
    assert!(t.store.is_empty());
}

#[tokio::test]
async fn test_blank_transcription_is_a_client_error() {
    let t = test_app(ScriptedProvider {
        transcript: "   ".into(),
        ..Default::default()
    });

    let (status, json) = send_json(
        &t.app,
        post_multipart(&[
            Part::Text("sessionId", "sess_quiet"),
            Part::File("audio", "audio/webm", b"\x1a\x45"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Не удалось распознать речь");
    // Only the system prompt; nothing from the failed turn.
    let state = t.store.snapshot("sess_quiet").await.unwrap();
    assert_eq!(state.messages.len(), 1);
}

#[tokio::test]
async fn test_unsupported_audio_is_logged_as_validation_error() {
    let t = test_app(ScriptedProvider::default());
    let (status, _) = send_json(
        &t.app,
        post_multipart(&[
            Part::Text("sessionId", "sess_wav"),
            Part::File("audio", "audio/wav", b"RIFF"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let path = t.events.current_file().unwrap();
    let TestApp {
        app, events, _dir, ..
    } = t;
    drop(app);
    drop(events);
    let log = std::fs::read_to_string(path).unwrap();
    let rejection = log
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .find(|event| event["type"] == "validation_error")
        .unwrap();
    assert_eq!(rejection["sessionId"], "sess_wav");
    assert_eq!(rejection["error"], "Только WebM и MP3 файлы разрешены");
}

#[tokio::test]
async fn test_provider_failure_is_hidden_and_logged() {
    let t = test_app(ScriptedProvider {
        fail_completion: true,
        ..Default::default()
    });

    let (status, json) = send_json(
        &t.app,
        post_json(
            "/api/chat/text",
            json!({"sessionId": "sess_err", "message": "Привет"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json, json!({"error": "Произошла ошибка на сервере."}));

    // Flush the log worker by dropping every handle to it.
    let path = t.events.current_file().unwrap();
    let TestApp {
        app, events, _dir, ..
    } = t;
    drop(app);
    drop(events);
    let log = std::fs::read_to_string(path).unwrap();
    let failure = log
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .find(|event| event["type"] == "server_error")
        .unwrap();
    assert_eq!(failure["sessionId"], "sess_err");
    assert!(failure["chain"].to_string().contains("overloaded"));
}

#[tokio::test]
async fn test_clear_history() {
    let t = test_app(ScriptedProvider::default());
    send_json(
        &t.app,
        post_json(
            "/api/chat/text",
            json!({"sessionId": "sess_c", "message": "Привет", "role": "business"}),
        ),
    )
    .await;

    let (status, json) = send_json(
        &t.app,
        post_json("/api/chat/clear", json!({"sessionId": "sess_c"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"success": true}));
    let state = t.store.snapshot("sess_c").await.unwrap();
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.role.as_str(), "default");

    let (status, json) = send_json(&t.app, post_json("/api/chat/clear", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "sessionId обязателен.");
}

#[tokio::test]
async fn test_role_endpoints() {
    let t = test_app(ScriptedProvider::default());

    let (status, json) = send_json(&t.app, get("/api/roles")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["default", "tech", "friendly", "business"]);
    assert_eq!(json[1]["name"], "Tech");

    let (status, json) = send_json(&t.app, get("/api/roles/tech")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["voiceType"], "echo");
    assert_eq!(json["models"]["chat"], "gpt-4");
    assert!(json["systemPrompt"].as_str().unwrap().len() > 10);

    let (status, json) = send_json(&t.app, get("/api/roles/pirate")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Роль не найдена");
}
