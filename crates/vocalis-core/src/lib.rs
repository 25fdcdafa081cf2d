//! vocalis-core: server side of the voice chat relay.
//!
//! A turn flows through [`TurnProcessor`]: the session is locked in the
//! [`ConversationStore`], the session's [`Role`] picks the models, the [`SpeechProvider`]
//! transcribes, completes and synthesizes, and the [`AudioStore`] keeps the spoken reply.
//! [`EventLog`] records each step as a JSON line.

pub mod audio_store;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event_log;
pub mod processor;
pub mod provider;
pub mod roles;
pub mod tasks;

pub use audio_store::{AudioStore, StoredAudio, AUDIO_ROUTE_PREFIX};
pub use config::RelayConfig;
pub use conversation::{
    ConversationMessage, ConversationState, ConversationStore, InMemoryConversationStore,
    SessionGuard, Speaker, StoreStats,
};
pub use error::{CoreError, CoreResult};
pub use event_log::EventLog;
pub use processor::{TurnError, TurnInput, TurnProcessor, TurnReply};
pub use provider::{
    AudioUpload, Completion, OpenAiProvider, SpeechProvider, TokenUsage, TranscriptionOptions,
};
pub use roles::{Role, RoleId, RoleModels, RoleRegistry, RoleSummary, DEFAULT_ROLE};
pub use tasks::{schedule_maintenance, MaintenanceSchedule, ScheduledTask, TaskSet};
