//! In-memory vector index with brute-force cosine similarity search.
//!
//! Holds the working set of the vector store while it is running. Search is
//! O(n), which is fine for one user's decision history.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use memento_core::error::MementoError;
use memento_core::types::{DecisionEvent, EventType, RetrievedDecision, StoredDecision};

#[derive(Debug, Clone)]
struct IndexEntry {
    event: DecisionEvent,
    embedding: Vec<f32>,
}

/// In-memory vector index keyed by `event_id`.
///
/// Thread-safe via interior RwLock.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Arc<RwLock<HashMap<String, IndexEntry>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from persisted decisions.
    pub fn from_decisions(decisions: Vec<StoredDecision>) -> Self {
        let entries = decisions
            .into_iter()
            .map(|d| {
                (
                    d.event.event_id.clone(),
                    IndexEntry {
                        event: d.event,
                        embedding: d.embedding,
                    },
                )
            })
            .collect();
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Insert a decision unless its `event_id` is already indexed.
    ///
    /// Returns true when the entry was added.
    pub fn insert_if_absent(&self, decision: &StoredDecision) -> Result<bool, MementoError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| MementoError::Storage(format!("Lock poisoned: {}", e)))?;
        if entries.contains_key(&decision.event.event_id) {
            return Ok(false);
        }
        entries.insert(
            decision.event.event_id.clone(),
            IndexEntry {
                event: decision.event.clone(),
                embedding: decision.embedding.clone(),
            },
        );
        Ok(true)
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(event_id))
            .unwrap_or(false)
    }

    /// Return the `k` decisions most similar to `query`.
    ///
    /// Ordered by descending cosine similarity; equal scores put the more
    /// recent `occurred_at` first, then the smaller `event_id`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        category: Option<EventType>,
    ) -> Result<Vec<RetrievedDecision>, MementoError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| MementoError::Storage(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<RetrievedDecision> = entries
            .values()
            .filter(|entry| category.map_or(true, |c| entry.event.event_type == c))
            .map(|entry| RetrievedDecision {
                score: cosine_similarity(query, &entry.embedding),
                event: entry.event.clone(),
            })
            .collect();

        scored.sort_by(rank);
        scored.truncate(k);
        Ok(scored)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn rank(a: &RetrievedDecision, b: &RetrievedDecision) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.event.occurred_at.cmp(&a.event.occurred_at))
        .then_with(|| a.event.event_id.cmp(&b.event.event_id))
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
