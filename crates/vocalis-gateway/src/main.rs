//! Vocalis Gateway: voice relay between browser clients and the speech/chat provider.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vocalis_core::{
    schedule_maintenance, AudioStore, ConversationStore, EventLog, InMemoryConversationStore,
    MaintenanceSchedule, OpenAiProvider, RelayConfig, RoleRegistry, TaskSet, TurnProcessor,
};
use vocalis_gateway::{build_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vocalis-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;

    let roles = match &config.roles_path {
        Some(path) => RoleRegistry::load(path)
            .with_context(|| format!("loading role table {}", path.display()))?,
        None => RoleRegistry::builtin(),
    };
    tracing::info!("🎭 {} roles loaded", roles.iter().count());

    let events = EventLog::open(&config.log_dir)
        .with_context(|| format!("opening log dir {}", config.log_dir.display()))?;
    let audio = AudioStore::open(&config.audio_dir)
        .with_context(|| format!("opening audio dir {}", config.audio_dir.display()))?;
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let provider = OpenAiProvider::new(config.api_base.clone(), config.api_key.clone())
        .with_transcription_options(config.transcription.clone());

    let processor = TurnProcessor::new(
        Arc::new(roles),
        store.clone(),
        Arc::new(provider),
        audio.clone(),
        events.clone(),
    )
    .with_history_limit(config.history_limit);

    let mut tasks = TaskSet::new();
    schedule_maintenance(
        &mut tasks,
        &MaintenanceSchedule {
            stats_interval: config.stats_interval,
            log_retention_days: config.log_retention_days,
            audio_retention: config.audio_retention,
        },
        store,
        events,
        audio,
    );
    tracing::info!("⏱️ Maintenance tasks: {:?}", tasks.names());

    let app = build_app(
        AppState::new(processor),
        &config.public_dir,
        &config.audio_dir,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("🚀 Vocalis gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("System Shutdown Initiated (Ctrl+C received)");
        })
        .await
        .context("server error")?;

    tasks.shutdown().await;
    tracing::info!("👋 Vocalis gateway stopped");
    Ok(())
}
