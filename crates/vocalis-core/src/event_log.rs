//! Append-only domain event log: one JSON object per line in `<dir>/YYYY-MM-DD.log`.
//!
//! Each line is `{"timestamp": <RFC 3339 UTC>, "type": <kind>, ...fields}`. Every event is
//! mirrored to `tracing`. Files roll daily (UTC date) through `tracing-appender`, and lines
//! are handed to its worker thread so request handlers never touch the file. Write failures
//! are reported through `tracing` and never reach the caller.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Event kinds written by the relay.
pub mod kind {
    pub const TEXT_MESSAGE_RECEIVED: &str = "text_message_received";
    pub const VOICE_MESSAGE_RECEIVED: &str = "voice_message_received";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const NEW_SESSION_CREATED: &str = "new_session_created";
    pub const WHISPER_REQUEST_STARTED: &str = "whisper_request_started";
    pub const WHISPER_RESPONSE_RECEIVED: &str = "whisper_response_received";
    pub const GPT_REQUEST_STARTED: &str = "gpt_request_started";
    pub const GPT_RESPONSE_RECEIVED: &str = "gpt_response_received";
    pub const TTS_RESPONSE_RECEIVED: &str = "tts_response_received";
    pub const RESPONSE_SENT: &str = "response_sent";
    pub const CLEAR_HISTORY_REQUESTED: &str = "clear_history_requested";
    pub const HISTORY_CLEARED: &str = "history_cleared";
    pub const SESSIONS_STATS: &str = "sessions_stats";
    pub const SERVER_ERROR: &str = "server_error";
    pub const LOG_CLEANUP: &str = "log_cleanup";
    pub const AUDIO_CLEANUP: &str = "audio_cleanup";
}

struct FileSink {
    dir: PathBuf,
    writer: NonBlocking,
    // Flushes queued lines when the last clone of the log is dropped.
    _guard: WorkerGuard,
}

#[derive(Clone)]
pub struct EventLog {
    sink: Option<Arc<FileSink>>,
}

impl EventLog {
    /// Log into `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_suffix("log")
            .build(&dir)
            .map_err(io::Error::other)?;
        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("vocalis-events")
            .finish(appender);
        Ok(Self {
            sink: Some(Arc::new(FileSink {
                dir,
                writer,
                _guard: guard,
            })),
        })
    }

    /// A log that only mirrors to `tracing` and writes no files.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.sink.as_deref().map(|sink| sink.dir.as_path())
    }

    /// Path of today's log file.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.dir()
            .map(|d| d.join(format!("{}.log", Utc::now().format("%Y-%m-%d"))))
    }

    /// Record one event. `fields` should be a JSON object; other values land under `data`.
    pub fn record(&self, event_type: &str, fields: Value) {
        let line = render_line(event_type, fields);
        if event_type == kind::SERVER_ERROR {
            error!(target: "vocalis::events", "{}", line);
        } else {
            info!(target: "vocalis::events", "{}", line);
        }

        let Some(sink) = self.sink.as_deref() else {
            return;
        };
        // One write per line; the worker thread appends it whole.
        let mut writer = sink.writer.clone();
        if let Err(e) = writer.write_all(format!("{}\n", line).as_bytes()) {
            warn!("Failed to queue event log line: {}", e);
        }
    }

    /// Delete `*.log` files last modified more than `days` days ago. Returns how many were removed.
    pub fn clean_old_logs(&self, days: u64) -> io::Result<usize> {
        let Some(dir) = self.dir() else {
            return Ok(0);
        };
        let max_age = Duration::from_secs(days * SECS_PER_DAY);
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                std::fs::remove_file(&path)?;
                info!("Removed old event log {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn render_line(event_type: &str, fields: Value) -> String {
    let mut entry = Map::new();
    entry.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    entry.insert("type".to_string(), Value::String(event_type.to_string()));
    match fields {
        Value::Object(map) => {
            for (k, v) in map {
                if k != "timestamp" && k != "type" {
                    entry.insert(k, v);
                }
            }
        }
        Value::Null => {}
        other => {
            entry.insert("data".to_string(), other);
        }
    }
    Value::Object(entry).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs::File;

    #[test]
    fn test_record_appends_json_lines_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.record(kind::TEXT_MESSAGE_RECEIVED, json!({"sessionId": "s1", "messageLength": 5}));
        log.record(kind::HISTORY_CLEARED, json!({"sessionId": "s1"}));

        let path = log.current_file().unwrap();
        // Dropping the last handle flushes the worker.
        drop(log);
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(name.len(), "YYYY-MM-DD.log".len());

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "text_message_received");
        assert_eq!(lines[0]["sessionId"], "s1");
        assert_eq!(lines[0]["messageLength"], 5);
        assert!(lines[0]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(lines[1]["type"], "history_cleared");
    }

    #[test]
    fn test_fields_cannot_override_type() {
        let line = render_line(kind::SERVER_ERROR, json!({"type": "other", "error": "boom"}));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "server_error");
        assert_eq!(value["error"], "boom");
    }

    #[test]
    fn test_clean_old_logs_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        let old = dir.path().join("2000-01-01.log");
        let fresh = dir.path().join("2099-01-01.log");
        let other = dir.path().join("notes.txt");
        for p in [&old, &fresh, &other] {
            std::fs::write(p, b"{}\n").unwrap();
        }
        let forty_days_ago = SystemTime::now() - Duration::from_secs(40 * SECS_PER_DAY);
        for p in [&old, &other] {
            File::options()
                .write(true)
                .open(p)
                .unwrap()
                .set_modified(forty_days_ago)
                .unwrap();
        }

        assert_eq!(log.clean_old_logs(30).unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = EventLog::disabled();
        log.record(kind::RESPONSE_SENT, json!({}));
        assert!(log.current_file().is_none());
        assert_eq!(log.clean_old_logs(0).unwrap(), 0);
    }
}
