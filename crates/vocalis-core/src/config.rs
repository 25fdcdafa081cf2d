//! Relay configuration, read from the environment at startup.
//!
//! | Env | Default |
//! |-----|---------|
//! | `OPENAI_API_KEY` | required |
//! | `PORT` | 3000 |
//! | `OPENAI_API_BASE` | `https://api.openai.com/v1` |
//! | `VOCALIS_PUBLIC_DIR` | `public` |
//! | `VOCALIS_AUDIO_DIR` | `temp` |
//! | `VOCALIS_LOG_DIR` | `logs` |
//! | `VOCALIS_LOG_RETENTION_DAYS` | 30 |
//! | `VOCALIS_AUDIO_RETENTION_HOURS` | 24 (0 keeps audio forever) |
//! | `VOCALIS_STATS_INTERVAL_SECS` | 60 |
//! | `VOCALIS_HISTORY_LIMIT` | 0 (whole history) |
//! | `VOCALIS_ROLES_PATH` | unset (built-in roles) |
//! | `VOCALIS_TRANSCRIPTION_LANGUAGE` | `ru` |
//! | `VOCALIS_TRANSCRIPTION_PROMPT` | built-in prompt |
//!
//! Malformed numbers fall back to their defaults.

use crate::error::{CoreError, CoreResult};
use crate::provider::{TranscriptionOptions, OPENAI_API_BASE};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub api_base: String,
    pub port: u16,
    pub public_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_retention_days: u64,
    /// `None` disables the audio retention sweep.
    pub audio_retention: Option<Duration>,
    pub stats_interval: Duration,
    /// Non-system messages sent to completion; 0 sends the whole history.
    pub history_limit: usize,
    pub roles_path: Option<PathBuf>,
    pub transcription: TranscriptionOptions,
}

impl RelayConfig {
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let opt = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let api_key = opt("OPENAI_API_KEY").ok_or_else(|| {
            CoreError::Config("OPENAI_API_KEY is not set; the relay cannot start".to_string())
        })?;
        let defaults = TranscriptionOptions::default();
        let audio_hours: u64 = parse_or(opt("VOCALIS_AUDIO_RETENTION_HOURS"), 24);

        Ok(Self {
            api_key,
            api_base: opt("OPENAI_API_BASE").unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            port: parse_or(opt("PORT"), 3000),
            public_dir: opt("VOCALIS_PUBLIC_DIR")
                .unwrap_or_else(|| "public".into())
                .into(),
            audio_dir: opt("VOCALIS_AUDIO_DIR").unwrap_or_else(|| "temp".into()).into(),
            log_dir: opt("VOCALIS_LOG_DIR").unwrap_or_else(|| "logs".into()).into(),
            log_retention_days: parse_or(opt("VOCALIS_LOG_RETENTION_DAYS"), 30),
            audio_retention: (audio_hours > 0).then(|| Duration::from_secs(audio_hours * 3600)),
            stats_interval: Duration::from_secs(
                parse_or::<u64>(opt("VOCALIS_STATS_INTERVAL_SECS"), 60).max(1),
            ),
            history_limit: parse_or(opt("VOCALIS_HISTORY_LIMIT"), 0),
            roles_path: opt("VOCALIS_ROLES_PATH").map(PathBuf::from),
            transcription: TranscriptionOptions {
                language: opt("VOCALIS_TRANSCRIPTION_LANGUAGE").unwrap_or(defaults.language),
                prompt: opt("VOCALIS_TRANSCRIPTION_PROMPT").unwrap_or(defaults.prompt),
                temperature: defaults.temperature,
            },
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
