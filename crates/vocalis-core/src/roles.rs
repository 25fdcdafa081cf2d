//! **Role registry**: the closed set of personas a conversation can run under.
//!
//! Each [`RoleId`] maps to exactly one [`Role`] record (prompt, model selection, voice).
//! The table is built once at startup, either from the built-in personas or from a TOML
//! file that overrides them, and is validated before the gateway starts serving.
//!
//! Two lookups with different failure behavior:
//! - [`RoleRegistry::resolve`] never fails; unknown ids fall back to [`DEFAULT_ROLE`].
//! - [`RoleRegistry::get`] is strict and returns `None` for unknown ids (HTTP 404).

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Role id used when a client names no role or an unknown one.
pub const DEFAULT_ROLE: &str = "default";

/// Voices accepted by the speech synthesis endpoint.
pub const KNOWN_VOICES: &[&str] = &[
    "alloy", "ash", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer",
];

/// Identifier of a configured persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleId {
    Default,
    Tech,
    Friendly,
    Business,
}

impl RoleId {
    /// All role ids in table order.
    pub const ALL: [RoleId; 4] = [
        RoleId::Default,
        RoleId::Tech,
        RoleId::Friendly,
        RoleId::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleId::Default => "default",
            RoleId::Tech => "tech",
            RoleId::Friendly => "friendly",
            RoleId::Business => "business",
        }
    }

    /// Parse a client-supplied id. Matching is exact and case-sensitive.
    pub fn parse(s: &str) -> Option<Self> {
        RoleId::ALL.into_iter().find(|id| id.as_str() == s)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleId::parse(s).ok_or_else(|| CoreError::RoleTable(format!("unknown role id '{}'", s)))
    }
}

/// Models used by a role for each provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleModels {
    /// Chat completion model.
    pub chat: String,
    /// Speech synthesis model.
    pub voice: String,
    /// Transcription model.
    pub transcription: String,
}

/// A persona: prompt, model selection and synthesized voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub system_prompt: String,
    pub models: RoleModels,
    pub voice_type: String,
}

/// Listing entry for `GET /api/roles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// One `[roles.<id>]` table in a role file.
#[derive(Debug, Deserialize)]
struct RoleEntry {
    name: String,
    system_prompt: String,
    voice_type: String,
    models: RoleModels,
}

#[derive(Debug, Deserialize)]
struct RoleFile {
    #[serde(default)]
    roles: BTreeMap<String, RoleEntry>,
}

/// Static mapping from [`RoleId`] to [`Role`]. Not mutated after startup.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    // Indexed by `RoleId::index`; always holds one record per id.
    roles: Vec<Role>,
}

impl RoleRegistry {
    /// The built-in persona table.
    pub fn builtin() -> Self {
        Self {
            roles: RoleId::ALL.into_iter().map(builtin_role).collect(),
        }
    }

    /// Parse a TOML role file. Ids present in the file replace the built-in record;
    /// ids not mentioned keep the built-in persona. Unknown ids are rejected.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let file: RoleFile =
            toml::from_str(source).map_err(|e| CoreError::RoleTable(e.to_string()))?;
        let mut registry = Self::builtin();
        for (key, entry) in file.roles {
            let id: RoleId = key.parse()?;
            registry.roles[id.index()] = Role {
                id,
                name: entry.name,
                system_prompt: entry.system_prompt,
                models: entry.models,
                voice_type: entry.voice_type,
            };
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Load and validate a TOML role file from disk.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&source)?;
        info!("Role table loaded from {}", path.display());
        Ok(registry)
    }

    /// Check every record is usable: non-empty prompt, names and models, and a known voice.
    pub fn validate(&self) -> CoreResult<()> {
        for role in &self.roles {
            let blank = [
                ("name", &role.name),
                ("system_prompt", &role.system_prompt),
                ("models.chat", &role.models.chat),
                ("models.voice", &role.models.voice),
                ("models.transcription", &role.models.transcription),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty());
            if let Some((field, _)) = blank {
                return Err(CoreError::RoleTable(format!(
                    "role '{}' has an empty {}",
                    role.id, field
                )));
            }
            if !KNOWN_VOICES.contains(&role.voice_type.as_str()) {
                return Err(CoreError::RoleTable(format!(
                    "role '{}' uses unknown voice '{}'",
                    role.id, role.voice_type
                )));
            }
        }
        Ok(())
    }

    /// Look up a role for use. Unknown ids resolve to the default role; never fails.
    pub fn resolve(&self, id: &str) -> &Role {
        self.by_id(RoleId::parse(id).unwrap_or(RoleId::Default))
    }

    /// Strict lookup. `None` when the id is not configured.
    pub fn get(&self, id: &str) -> Option<&Role> {
        RoleId::parse(id).map(|id| self.by_id(id))
    }

    pub fn by_id(&self, id: RoleId) -> &Role {
        &self.roles[id.index()]
    }

    /// The role new and reset sessions fall back to.
    pub fn default_role(&self) -> &Role {
        self.by_id(RoleId::Default)
    }

    pub fn is_valid(&self, id: &str) -> bool {
        RoleId::parse(id).is_some()
    }

    /// Listing in table order: id, capitalized id as name, prompt as description.
    pub fn summaries(&self) -> Vec<RoleSummary> {
        self.roles
            .iter()
            .map(|role| RoleSummary {
                id: role.id.to_string(),
                name: capitalize(role.id.as_str()),
                description: role.system_prompt.clone(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn builtin_role(id: RoleId) -> Role {
    let (name, system_prompt, chat, voice, voice_type) = match id {
        RoleId::Default => (
            "Голосовой ChatGPT Бот",
            "Ты — голосовой ассистент. Отвечай вежливо и развёрнуто, добавляй подробности.",
            "gpt-3.5-turbo",
            "tts-1",
            "alloy",
        ),
        RoleId::Tech => (
            "Технический Консультант",
            "Ты — технический специалист. Отвечай на вопросы, используя технические термины. \
             Давай подробные технические объяснения. При необходимости приводи примеры кода.",
            "gpt-4",
            "tts-1",
            "echo",
        ),
        RoleId::Friendly => (
            "Дружелюбный Помощник",
            "Ты — дружелюбный помощник. Общайся неформально, используй простые слова. \
             Будь позитивным и поддерживающим.",
            "gpt-3.5-turbo",
            "tts-1-hd",
            "nova",
        ),
        RoleId::Business => (
            "Бизнес-консультант",
            "Ты — бизнес-консультант. Давай профессиональные советы по бизнесу, маркетингу и \
             управлению. Используй деловой стиль общения.",
            "gpt-4",
            "tts-1",
            "onyx",
        ),
    };
    Role {
        id,
        name: name.to_string(),
        system_prompt: system_prompt.to_string(),
        models: RoleModels {
            chat: chat.to_string(),
            voice: voice.to_string(),
            transcription: "whisper-1".to_string(),
        },
        voice_type: voice_type.to_string(),
    }
}
