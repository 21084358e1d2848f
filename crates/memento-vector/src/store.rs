//! Vector store with an explicit running/stopped lifecycle.
//!
//! `LocalVectorStore` persists decisions in SQLite and serves similarity
//! search from an in-memory [`VectorIndex`] that only exists while the store
//! is running. Starting reloads the index from disk after a warm-up delay;
//! stopping drops it. A stopped store refuses every operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use memento_core::error::MementoError;
use memento_core::types::{EventType, RetrievedDecision, StoredDecision};
use memento_storage::DecisionRepository;

use crate::index::VectorIndex;

/// Result of an upsert keyed by `event_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    /// A decision with this `event_id` already exists; nothing changed.
    AlreadyPresent,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Bring the store up. Idempotent.
    async fn start(&self) -> Result<(), MementoError>;

    /// Release in-memory resources. Persisted data is kept.
    async fn stop(&self) -> Result<(), MementoError>;

    fn is_running(&self) -> bool;

    async fn upsert(&self, decision: StoredDecision) -> Result<UpsertOutcome, MementoError>;

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        category: Option<EventType>,
    ) -> Result<Vec<RetrievedDecision>, MementoError>;

    /// Every stored decision with `occurred_at >= since`, oldest first.
    async fn scan(&self, since: Option<DateTime<Utc>>)
        -> Result<Vec<StoredDecision>, MementoError>;

    async fn count(&self) -> Result<u64, MementoError>;
}

pub struct LocalVectorStore {
    repo: DecisionRepository,
    index: RwLock<Option<VectorIndex>>,
    warmup: Duration,
    dimensions: usize,
    running: AtomicBool,
}

impl LocalVectorStore {
    pub fn new(repo: DecisionRepository, dimensions: usize, warmup: Duration) -> Self {
        Self {
            repo,
            index: RwLock::new(None),
            warmup,
            dimensions,
            running: AtomicBool::new(false),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn unavailable() -> MementoError {
        MementoError::StoreUnavailable("vector store is stopped".to_string())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn start(&self) -> Result<(), MementoError> {
        let mut guard = self.index.write().await;
        if guard.is_some() {
            return Ok(());
        }

        if !self.warmup.is_zero() {
            debug!(warmup_ms = self.warmup.as_millis() as u64, "Vector store warming up");
            tokio::time::sleep(self.warmup).await;
        }

        let decisions = self.repo.scan(None)?;
        let index = VectorIndex::from_decisions(decisions);
        info!(decisions = index.len(), "Vector store started");
        *guard = Some(index);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MementoError> {
        let mut guard = self.index.write().await;
        if guard.take().is_some() {
            info!("Vector store stopped");
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn upsert(&self, decision: StoredDecision) -> Result<UpsertOutcome, MementoError> {
        if decision.embedding.len() != self.dimensions {
            return Err(MementoError::EmbeddingDimension {
                expected: self.dimensions,
                actual: decision.embedding.len(),
            });
        }

        // Held for the whole write so a concurrent stop cannot interleave.
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or_else(Self::unavailable)?;

        let inserted = self.repo.insert(&decision)?;
        index.insert_if_absent(&decision)?;

        if inserted {
            debug!(event_id = %decision.event.event_id, "Decision upserted");
            Ok(UpsertOutcome::Inserted)
        } else {
            debug!(event_id = %decision.event.event_id, "Decision already present");
            Ok(UpsertOutcome::AlreadyPresent)
        }
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        category: Option<EventType>,
    ) -> Result<Vec<RetrievedDecision>, MementoError> {
        if query.len() != self.dimensions {
            return Err(MementoError::EmbeddingDimension {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or_else(Self::unavailable)?;
        index.search(query, k, category)
    }

    async fn scan(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredDecision>, MementoError> {
        let guard = self.index.read().await;
        if guard.is_none() {
            return Err(Self::unavailable());
        }
        self.repo.scan(since)
    }

    async fn count(&self) -> Result<u64, MementoError> {
        let guard = self.index.read().await;
        guard
            .as_ref()
            .map(|index| index.len() as u64)
            .ok_or_else(Self::unavailable)
    }
}

/// Convenience constructor used by the binary and tests.
pub fn local_store(
    db: Arc<memento_storage::Database>,
    dimensions: usize,
    warmup: Duration,
) -> Arc<LocalVectorStore> {
    Arc::new(LocalVectorStore::new(
        DecisionRepository::new(db),
        dimensions,
        warmup,
    ))
}
