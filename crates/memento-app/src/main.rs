//! Memento application binary - composition root.
//!
//! 1. Load configuration from TOML (CLI flags override)
//! 2. Open the SQLite database
//! 3. Build the embedding service and application state
//! 4. Spawn the ingestion worker, idle monitor, profile scheduler and event log
//! 5. Serve the HTTP API until Ctrl-C, then let background loops wind down

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use memento_api::state::AppState;
use memento_core::config::{EmbeddingBackend, MementoConfig};
use memento_core::events::MemoryEvent;
use memento_profile::ProfileScheduler;
use memento_storage::Database;
use memento_vector::{DynEmbeddingService, HashEmbedding, OnnxEmbeddingService};

use cli::{expand_home, CliArgs};

fn build_embedder(
    config: &MementoConfig,
) -> Result<Arc<dyn DynEmbeddingService>, Box<dyn std::error::Error>> {
    let dimensions = config.embedding.dimensions;
    match config.embedding.backend {
        EmbeddingBackend::Hash => {
            tracing::info!(dimensions, "Using hash embeddings");
            Ok(Arc::new(HashEmbedding::new(dimensions)))
        }
        EmbeddingBackend::Onnx => {
            let service = OnnxEmbeddingService::from_files(
                &expand_home(&config.embedding.model_path),
                &expand_home(&config.embedding.tokenizer_path),
                dimensions,
            )?;
            tracing::info!(dimensions, model = %config.embedding.model_path, "ONNX embedding model loaded");
            Ok(Arc::new(service))
        }
    }
}

/// Mirror subsystem events into the log.
async fn event_logger(mut rx: broadcast::Receiver<MemoryEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event {
                MemoryEvent::DecisionDeadLettered { .. }
                | MemoryEvent::ProfileBuildFailed { .. }
                | MemoryEvent::RetrievalUnavailable { .. } => {
                    tracing::warn!(event = event.event_name(), detail = ?event, "Memory event")
                }
                _ => tracing::debug!(event = event.event_name(), detail = ?event, "Memory event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// How long background loops get to finish in-flight work after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wait for every task to exit, aborting whatever is still running after
/// `grace`. Returns the number of tasks that had to be aborted.
async fn drain_tasks(tasks: &mut JoinSet<()>, grace: Duration) -> usize {
    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Background task failed");
            }
        }
    })
    .await
    .is_ok();
    if finished {
        return 0;
    }

    let remaining = tasks.len();
    tracing::warn!(remaining, "Background tasks still running after grace period, aborting");
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    remaining
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = MementoConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(ref level) = args.log_level {
        config.general.log_level = level.clone();
    }
    config.api.port = args.resolve_port(config.api.port);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Memento v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("memento.db");
    let database = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    memento_api::init_metrics()?;

    let embedder = build_embedder(&config)?;
    let state = AppState::assemble(config, database, embedder);
    let config = Arc::clone(&state.config);

    // === Background tasks ===

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let mut tasks = JoinSet::new();

    // Not shutdown-aware; aborted once everything else has stopped.
    let logger = tokio::spawn(event_logger(state.event_tx.subscribe()));

    let worker = Arc::clone(&state.worker);
    tasks.spawn(worker.run(shutdown_rx.clone()));

    let lifecycle = state.lifecycle.clone();
    let monitor_interval = config.store.monitor_interval();
    let monitor_shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        lifecycle
            .run_idle_monitor(monitor_interval, monitor_shutdown)
            .await
    });

    let scheduler = ProfileScheduler::new(Arc::clone(&state.builder), config.profile.interval());
    let scheduler_shutdown = shutdown_rx.clone();
    tasks.spawn(async move { scheduler.run(scheduler_shutdown).await });

    if config.store.start_on_boot {
        state.lifecycle.request_start();
    }

    // Ctrl-C flips the shared shutdown flag.
    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = signal_tx.send(true);
    });

    // === API server ===

    let served = memento_api::start_server(state, shutdown_rx).await;

    // The server can also return on a bind or I/O error.
    let _ = shutdown_tx.send(true);
    drain_tasks(&mut tasks, SHUTDOWN_GRACE).await;
    logger.abort();

    served?;
    tracing::info!("Memento stopped");
    Ok(())
}
