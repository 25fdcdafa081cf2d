//! Background maintenance: named periodic tasks with an explicit lifecycle.
//!
//! Every task runs on its own `tokio::time::interval` (missed ticks skipped) and watches a
//! shared shutdown signal. [`TaskSet::shutdown`] flips the signal and joins every task.

use crate::audio_store::AudioStore;
use crate::conversation::ConversationStore;
use crate::event_log::{kind, EventLog};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const LOG_RETENTION_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
pub const AUDIO_RETENTION_PERIOD: Duration = Duration::from_secs(60 * 60);

/// A spawned periodic task.
pub struct ScheduledTask {
    pub name: &'static str,
    handle: JoinHandle<()>,
}

pub struct TaskSet {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<ScheduledTask>,
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSet {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Run `job` every `period`, first one `period` after spawning.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!("Scheduled task '{}' started ({:?})", name, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Scheduled task '{}' stopped", name);
        });
        self.tasks.push(ScheduledTask { name, handle });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.handle.await {
                warn!("Scheduled task '{}' ended abnormally: {}", task.name, e);
            }
        }
        info!("Background tasks stopped");
    }
}

/// Settings for [`schedule_maintenance`].
#[derive(Debug, Clone)]
pub struct MaintenanceSchedule {
    pub stats_interval: Duration,
    pub log_retention_days: u64,
    /// `None` disables the audio sweep.
    pub audio_retention: Option<Duration>,
}

/// Register the relay's maintenance jobs: session statistics, log retention and, when
/// enabled, audio retention.
pub fn schedule_maintenance(
    tasks: &mut TaskSet,
    schedule: &MaintenanceSchedule,
    store: Arc<dyn ConversationStore>,
    events: EventLog,
    audio: AudioStore,
) {
    {
        let events = events.clone();
        tasks.spawn_periodic("session-stats", schedule.stats_interval, move || {
            let store = store.clone();
            let events = events.clone();
            async move {
                let stats = store.stats().await;
                events.record(
                    kind::SESSIONS_STATS,
                    serde_json::to_value(stats).unwrap_or_default(),
                );
            }
        });
    }

    {
        let events = events.clone();
        let days = schedule.log_retention_days;
        tasks.spawn_periodic("log-retention", LOG_RETENTION_PERIOD, move || {
            let events = events.clone();
            async move {
                let cleaner = events.clone();
                match tokio::task::spawn_blocking(move || cleaner.clean_old_logs(days)).await {
                    Ok(Ok(removed)) => events.record(
                        kind::LOG_CLEANUP,
                        json!({"removed": removed, "retentionDays": days}),
                    ),
                    Ok(Err(e)) => warn!("Log retention sweep failed: {}", e),
                    Err(e) => warn!("Log retention sweep panicked: {}", e),
                }
            }
        });
    }

    if let Some(max_age) = schedule.audio_retention {
        tasks.spawn_periodic("audio-retention", AUDIO_RETENTION_PERIOD, move || {
            let audio = audio.clone();
            let events = events.clone();
            async move {
                match audio.sweep(max_age).await {
                    Ok(removed) => events.record(
                        kind::AUDIO_CLEANUP,
                        json!({"removed": removed, "maxAgeSecs": max_age.as_secs()}),
                    ),
                    Err(e) => warn!("Audio retention sweep failed: {}", e),
                }
            }
        });
    }
}
