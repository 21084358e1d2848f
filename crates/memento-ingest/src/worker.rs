//! Ingestion worker: queue → validate → embed → upsert.
//!
//! Consumes decision events from the durable queue, embeds their context text
//! and upserts them into the vector store keyed by `event_id`. Delivery is at
//! least once, so a redelivered event that is already stored counts as
//! success. Transient failures are redelivered with exponential backoff;
//! permanent ones, and transient ones past `max_attempts`, go to the
//! dead-letter sink. Nothing here ever reaches back to the producer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use memento_core::config::IngestionConfig;
use memento_core::error::MementoError;
use memento_core::events::MemoryEvent;
use memento_core::types::{DecisionEvent, StoredDecision, Timestamp};
use memento_storage::{DeadLetterSink, EventQueue, QueuedMessage};
use memento_vector::{embed_checked, DynEmbeddingService, LifecycleController, UpsertOutcome};

use crate::metrics;
use crate::retry::{ErrorCategory, RetryPolicy};

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored,
    /// Already present from an earlier delivery.
    Duplicate,
    Retrying { attempt: u32, delay: Duration },
    DeadLettered { reason: String },
}

/// A failed step, before the retry policy decides what to do with it.
struct Failure {
    category: ErrorCategory,
    reason: &'static str,
    detail: String,
}

impl Failure {
    fn permanent(reason: &'static str, detail: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Permanent,
            reason,
            detail: detail.into(),
        }
    }

    fn from_error(reason: &'static str, err: &MementoError) -> Self {
        Self {
            category: ErrorCategory::of(err),
            reason,
            detail: err.to_string(),
        }
    }
}

pub struct IngestionWorker {
    queue: Arc<EventQueue>,
    dead_letters: Arc<DeadLetterSink>,
    lifecycle: LifecycleController,
    embedder: Arc<dyn DynEmbeddingService>,
    dimensions: usize,
    embed_timeout: Duration,
    config: IngestionConfig,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    events: Option<broadcast::Sender<MemoryEvent>>,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<EventQueue>,
        dead_letters: Arc<DeadLetterSink>,
        lifecycle: LifecycleController,
        embedder: Arc<dyn DynEmbeddingService>,
        dimensions: usize,
        embed_timeout: Duration,
        config: IngestionConfig,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            queue,
            dead_letters,
            lifecycle,
            embedder,
            dimensions,
            embed_timeout,
            config,
            policy,
            semaphore,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: broadcast::Sender<MemoryEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Poll the queue until `shutdown` flips to true.
    ///
    /// In-flight deliveries finish before the loop exits; anything still
    /// leased after that is redelivered on the next start.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            max_concurrent = self.config.max_concurrent,
            poll_interval_ms = self.config.poll_interval_ms,
            "Ingestion worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = match self
                .queue
                .receive(self.config.batch_size, self.config.visibility_timeout())
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to read from event queue");
                    Vec::new()
                }
            };

            if !batch.is_empty() {
                self.process_batch(batch).await;
                self.observe_depth();
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("Ingestion worker stopped");
    }

    /// Process every message currently visible, then return their outcomes.
    pub async fn drain_once(self: &Arc<Self>) -> Result<Vec<IngestOutcome>, MementoError> {
        let mut outcomes = Vec::new();
        loop {
            let batch = self
                .queue
                .receive(self.config.batch_size, self.config.visibility_timeout())?;
            if batch.is_empty() {
                break;
            }
            outcomes.extend(self.process_batch(batch).await);
        }
        self.observe_depth();
        Ok(outcomes)
    }

    /// Process a leased batch concurrently, bounded by `max_concurrent`.
    async fn process_batch(self: &Arc<Self>, batch: Vec<QueuedMessage>) -> Vec<IngestOutcome> {
        let mut join_set: JoinSet<Option<(i64, IngestOutcome)>> = JoinSet::new();

        for message in batch {
            let worker = Arc::clone(self);
            let semaphore = Arc::clone(&self.semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let outcome = worker.process_message(&message).await;
                Some((message.seq, outcome))
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Ingestion task panicked"),
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Handle one delivery end to end, including ack/nack/dead-letter.
    pub async fn process_message(&self, message: &QueuedMessage) -> IngestOutcome {
        let event = match serde_json::from_str::<DecisionEvent>(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                let failure = Failure::permanent("malformed_payload", e.to_string());
                return self.fail(message, message.event_id.clone(), failure);
            }
        };

        if let Err(e) = event.validate(self.config.max_context_len) {
            let failure = Failure::permanent(e.reason_code(), e.to_string());
            return self.fail(message, Some(event.event_id.clone()), failure);
        }

        match self.store(event.clone()).await {
            Ok(UpsertOutcome::Inserted) => {
                self.ack(message);
                metrics::decision_stored();
                debug!(event_id = %event.event_id, "Decision stored");
                self.emit(MemoryEvent::DecisionStored {
                    event_id: event.event_id,
                    event_type: event.event_type,
                    timestamp: Timestamp::now(),
                });
                IngestOutcome::Stored
            }
            Ok(UpsertOutcome::AlreadyPresent) => {
                self.ack(message);
                metrics::decision_duplicate();
                debug!(event_id = %event.event_id, "Duplicate delivery ignored");
                self.emit(MemoryEvent::DecisionDuplicate {
                    event_id: event.event_id,
                    timestamp: Timestamp::now(),
                });
                IngestOutcome::Duplicate
            }
            Err(failure) => self.fail(message, Some(event.event_id), failure),
        }
    }

    async fn store(&self, event: DecisionEvent) -> Result<UpsertOutcome, Failure> {
        self.lifecycle.record_activity();
        if !self.lifecycle.is_available() {
            self.lifecycle.request_start();
            return Err(Failure {
                category: ErrorCategory::Transient,
                reason: "store_unavailable",
                detail: format!("vector store is {}", self.lifecycle.state()),
            });
        }

        let embedding = match tokio::time::timeout(
            self.embed_timeout,
            embed_checked(self.embedder.as_ref(), &event.context_text, self.dimensions),
        )
        .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e @ MementoError::EmbeddingDimension { .. })) => {
                return Err(Failure::from_error("embedding_dimension_mismatch", &e));
            }
            Ok(Err(e)) => return Err(Failure::from_error("embedding_failed", &e)),
            Err(_) => {
                let timeout = MementoError::Timeout(self.embed_timeout.as_millis() as u64);
                return Err(Failure::from_error("embedding_failed", &timeout));
            }
        };

        self.lifecycle
            .store()
            .upsert(StoredDecision::new(event, embedding))
            .await
            .map_err(|e| match e {
                MementoError::EmbeddingDimension { .. } => {
                    Failure::from_error("embedding_dimension_mismatch", &e)
                }
                MementoError::StoreUnavailable(_) => Failure::from_error("store_unavailable", &e),
                // Lock contention and I/O errors are retried.
                _ => Failure {
                    category: ErrorCategory::Transient,
                    reason: "store_error",
                    detail: e.to_string(),
                },
            })
    }

    fn fail(&self, message: &QueuedMessage, event_id: Option<String>, failure: Failure) -> IngestOutcome {
        let attempt = message.delivery_count;

        if self.policy.should_retry(failure.category, attempt) {
            let delay = self.policy.backoff_delay(attempt);
            if let Err(e) = self.queue.nack(&message.message_id, delay) {
                // The lease expires on its own and the message comes back.
                error!(message_id = %message.message_id, error = %e, "Failed to nack message");
            }
            metrics::retry_scheduled(failure.reason);
            warn!(
                event_id = ?event_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = failure.reason,
                detail = %failure.detail,
                "Ingestion failed, retry scheduled"
            );
            self.emit(MemoryEvent::IngestRetryScheduled {
                event_id: event_id.unwrap_or_default(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                timestamp: Timestamp::now(),
            });
            return IngestOutcome::Retrying { attempt, delay };
        }

        // Dead-letter insert and queue removal commit together.
        if let Err(e) = self.dead_letters.dead_letter_message(
            &message.message_id,
            event_id.as_deref(),
            &message.payload,
            failure.reason,
            &failure.detail,
            attempt,
        ) {
            // Leave the message leased so it is redelivered rather than lost.
            error!(message_id = %message.message_id, error = %e, "Failed to dead-letter message");
            return IngestOutcome::Retrying {
                attempt,
                delay: self.config.visibility_timeout(),
            };
        }
        metrics::dead_lettered(failure.reason);
        self.emit(MemoryEvent::DecisionDeadLettered {
            event_id,
            reason_code: failure.reason.to_string(),
            attempts: attempt,
            timestamp: Timestamp::now(),
        });
        IngestOutcome::DeadLettered {
            reason: failure.reason.to_string(),
        }
    }

    fn ack(&self, message: &QueuedMessage) {
        if let Err(e) = self.queue.ack(&message.message_id) {
            error!(message_id = %message.message_id, error = %e, "Failed to ack message");
        }
    }

    fn observe_depth(&self) {
        match self.queue.depth() {
            Ok(depth) => metrics::queue_depth(depth),
            Err(e) => debug!(error = %e, "Failed to read queue depth"),
        }
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
