//! Application state shared across all route handlers.
//!
//! AppState wires the subsystem together: one SQLite database backs the
//! queue, dead letters, stored decisions and profile cache; one lifecycle
//! controller fronts the vector store; one broadcast channel carries
//! [`MemoryEvent`]s to the SSE stream and the log.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use memento_core::config::MementoConfig;
use memento_core::events::MemoryEvent;
use memento_ingest::{DecisionPublisher, IngestionWorker};
use memento_profile::{ProfileBuilder, TemplateNarrator};
use memento_storage::{
    Database, DeadLetterSink, DecisionRepository, EventQueue, ProfileCache, ProfileReader,
    SqliteProfileCache,
};
use memento_vector::{
    local_store, DynEmbeddingService, LifecycleConfig, LifecycleController, RetrievalService,
    RetrievalSettings,
};

/// Capacity of the subsystem event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state.
///
/// All fields use `Arc` (or are cheap handles) for cloning across handler
/// tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MementoConfig>,
    pub database: Arc<Database>,
    pub queue: Arc<EventQueue>,
    pub dead_letters: Arc<DeadLetterSink>,
    pub decisions: Arc<DecisionRepository>,
    pub publisher: Arc<DecisionPublisher>,
    pub lifecycle: LifecycleController,
    pub retrieval: Arc<RetrievalService>,
    pub worker: Arc<IngestionWorker>,
    pub profiles: ProfileReader,
    pub builder: Arc<ProfileBuilder>,
    /// Broadcast sender for subsystem events.
    pub event_tx: broadcast::Sender<MemoryEvent>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Build every component from `config` over an open database.
    pub fn assemble(
        config: MementoConfig,
        database: Arc<Database>,
        embedder: Arc<dyn DynEmbeddingService>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dimensions = config.embedding.dimensions;

        let queue = Arc::new(EventQueue::new(database.clone()));
        let dead_letters = Arc::new(DeadLetterSink::new(database.clone()));
        let store = local_store(database.clone(), dimensions, config.store.warmup());
        let lifecycle = LifecycleController::new(
            store,
            LifecycleConfig {
                idle_after: config.store.idle_after(),
                stop_after: config.store.stop_after(),
            },
        )
        .with_events(event_tx.clone());

        let retrieval = RetrievalService::new(
            lifecycle.clone(),
            embedder.clone(),
            RetrievalSettings {
                dimensions,
                default_k: config.retrieval.default_k,
                max_k: config.retrieval.max_k,
            },
        )
        .with_events(event_tx.clone());

        let worker = IngestionWorker::new(
            queue.clone(),
            dead_letters.clone(),
            lifecycle.clone(),
            embedder,
            dimensions,
            config.embedding.timeout(),
            config.ingestion.clone(),
        )
        .with_events(event_tx.clone());

        let cache: Arc<dyn ProfileCache> = Arc::new(SqliteProfileCache::new(database.clone()));
        let builder = ProfileBuilder::new(lifecycle.clone(), cache.clone(), config.profile.clone())
            .with_narrator(Arc::new(TemplateNarrator::new()))
            .with_events(event_tx.clone());

        Self {
            queue: queue.clone(),
            dead_letters,
            decisions: Arc::new(DecisionRepository::new(database.clone())),
            publisher: Arc::new(DecisionPublisher::new(queue)),
            lifecycle,
            retrieval: Arc::new(retrieval),
            worker: Arc::new(worker),
            profiles: ProfileReader::new(cache),
            builder: Arc::new(builder),
            config: Arc::new(config),
            database,
            event_tx,
            start_time: Instant::now(),
        }
    }
}
