//! Budgeted, read-only retrieval of similar past decisions.
//!
//! A retrieval never outlives its budget and never fails the caller: it
//! returns either ranked hits or an explicit unavailable outcome.
//! [`ContextProvider`] layers the caller-side fallback on top: hits first,
//! then the cached preference profile, then nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use memento_core::error::MementoError;
use memento_core::events::MemoryEvent;
use memento_core::types::{EventType, PreferenceProfile, RetrievedDecision, Timestamp};
use memento_storage::{ProfileLookup, ProfileReader};

use crate::embedding::{embed_checked, DynEmbeddingService};
use crate::lifecycle::LifecycleController;

/// Histogram of end-to-end retrieval latency, labeled by outcome status.
pub const RETRIEVAL_DURATION_SECONDS: &str = "memento_retrieval_duration_seconds";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    /// Restrict hits to one decision category.
    #[serde(default)]
    pub category: Option<EventType>,
    /// Number of hits wanted; defaults to the configured `default_k`.
    #[serde(default)]
    pub k: Option<usize>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: EventType) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The store was not running and could not be brought up in time.
    StoreStopped,
    /// The budget expired while the store was available.
    Timeout,
    EmbeddingFailed,
    StoreError,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::StoreStopped => "store_stopped",
            UnavailableReason::Timeout => "timeout",
            UnavailableReason::EmbeddingFailed => "embedding_failed",
            UnavailableReason::StoreError => "store_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrievalOutcome {
    #[serde(rename = "ok")]
    Hits { hits: Vec<RetrievedDecision> },
    Unavailable { reason: UnavailableReason },
}

impl RetrievalOutcome {
    pub fn hits(&self) -> Option<&[RetrievedDecision]> {
        match self {
            RetrievalOutcome::Hits { hits } => Some(hits),
            RetrievalOutcome::Unavailable { .. } => None,
        }
    }
}

/// Tuning for [`RetrievalService`].
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub dimensions: usize,
    pub default_k: usize,
    pub max_k: usize,
}

pub struct RetrievalService {
    lifecycle: LifecycleController,
    embedder: Arc<dyn DynEmbeddingService>,
    settings: RetrievalSettings,
    events: Option<broadcast::Sender<MemoryEvent>>,
}

impl RetrievalService {
    pub fn new(
        lifecycle: LifecycleController,
        embedder: Arc<dyn DynEmbeddingService>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            lifecycle,
            embedder,
            settings,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: broadcast::Sender<MemoryEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Return up to K stored decisions most similar to `query`.
    ///
    /// Records activity and, if the store is stopped, triggers a start. Only
    /// waits for that start inside `budget`; the start itself carries on in
    /// the background.
    pub async fn retrieve(&self, query: RetrievalQuery, budget: Duration) -> RetrievalOutcome {
        let started = Instant::now();
        let k = query
            .k
            .unwrap_or(self.settings.default_k)
            .min(self.settings.max_k);

        if k == 0 || query.text.trim().is_empty() {
            return RetrievalOutcome::Hits { hits: Vec::new() };
        }

        self.lifecycle.record_activity();

        let outcome = match tokio::time::timeout(budget, self.search(&query, k)).await {
            Ok(Ok(hits)) => RetrievalOutcome::Hits { hits },
            Ok(Err(reason)) => RetrievalOutcome::Unavailable { reason },
            Err(_) if !self.lifecycle.is_available() => RetrievalOutcome::Unavailable {
                reason: UnavailableReason::StoreStopped,
            },
            Err(_) => RetrievalOutcome::Unavailable {
                reason: UnavailableReason::Timeout,
            },
        };

        let elapsed = started.elapsed();
        let latency_ms = elapsed.as_millis() as u64;
        let status = match &outcome {
            RetrievalOutcome::Hits { .. } => "ok",
            RetrievalOutcome::Unavailable { reason } => reason.as_str(),
        };
        histogram!(RETRIEVAL_DURATION_SECONDS, "status" => status).record(elapsed.as_secs_f64());

        match &outcome {
            RetrievalOutcome::Hits { hits } => {
                debug!(results = hits.len(), latency_ms, "Retrieval completed");
                self.emit(MemoryEvent::RetrievalPerformed {
                    result_count: hits.len(),
                    latency_ms,
                    timestamp: Timestamp::now(),
                });
            }
            RetrievalOutcome::Unavailable { reason } => {
                info!(reason = reason.as_str(), latency_ms, "Retrieval unavailable");
                self.emit(MemoryEvent::RetrievalUnavailable {
                    reason: reason.as_str().to_string(),
                    timestamp: Timestamp::now(),
                });
            }
        }
        outcome
    }

    async fn search(
        &self,
        query: &RetrievalQuery,
        k: usize,
    ) -> Result<Vec<RetrievedDecision>, UnavailableReason> {
        // Embedding does not need the store, so both run together.
        let (ready, embedded) = tokio::join!(
            self.lifecycle.start(),
            embed_checked(self.embedder.as_ref(), &query.text, self.settings.dimensions)
        );

        if let Err(e) = ready {
            debug!(error = %e, "Store not available for retrieval");
            return Err(UnavailableReason::StoreStopped);
        }
        let vector = embedded.map_err(|e| {
            warn!(error = %e, "Query embedding failed");
            UnavailableReason::EmbeddingFailed
        })?;

        self.lifecycle
            .store()
            .search(&vector, k, query.category)
            .await
            .map_err(|e| match e {
                MementoError::StoreUnavailable(_) => UnavailableReason::StoreStopped,
                other => {
                    warn!(error = %other, "Vector search failed");
                    UnavailableReason::StoreError
                }
            })
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Memory handed to prompt construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MemoryContext {
    Decisions { decisions: Vec<RetrievedDecision> },
    Profile { profile: PreferenceProfile },
    Empty,
}

/// Caller-side fallback: similar decisions, else the cached profile.
pub struct ContextProvider {
    retrieval: Arc<RetrievalService>,
    profiles: ProfileReader,
    scope: String,
}

impl ContextProvider {
    pub fn new(retrieval: Arc<RetrievalService>, profiles: ProfileReader, scope: impl Into<String>) -> Self {
        Self {
            retrieval,
            profiles,
            scope: scope.into(),
        }
    }

    /// Empty hit lists also fall through to the profile.
    pub async fn context_for(&self, query: RetrievalQuery, budget: Duration) -> MemoryContext {
        if let RetrievalOutcome::Hits { hits } = self.retrieval.retrieve(query, budget).await {
            if !hits.is_empty() {
                return MemoryContext::Decisions { decisions: hits };
            }
        }

        match self.profiles.read(&self.scope).await {
            Ok(ProfileLookup::Current { profile }) => MemoryContext::Profile { profile },
            Ok(ProfileLookup::NoProfileYet) => MemoryContext::Empty,
            Err(e) => {
                warn!(error = %e, "Profile cache read failed");
                MemoryContext::Empty
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, HashEmbedding};
    use crate::lifecycle::LifecycleConfig;
    use crate::store::local_store;
    use chrono::{Duration as ChronoDuration, Utc};
    use memento_core::types::{
        DecisionEvent, DecisionPayload, RuleBasedStats, StoreState, StoredDecision, Verdict,
    };
    use memento_storage::{Database, ProfileCache, SqliteProfileCache};

    const DIM: usize = 128;

    struct Fixture {
        db: Arc<Database>,
        lifecycle: LifecycleController,
        service: Arc<RetrievalService>,
    }

    fn fixture(warmup: Duration) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = local_store(db.clone(), DIM, warmup);
        let lifecycle = LifecycleController::new(store, LifecycleConfig::default());
        let service = RetrievalService::new(
            lifecycle.clone(),
            Arc::new(HashEmbedding::new(DIM)),
            RetrievalSettings {
                dimensions: DIM,
                default_k: 5,
                max_k: 20,
            },
        );
        Fixture {
            db,
            lifecycle,
            service: Arc::new(service),
        }
    }

    async fn seed(lifecycle: &LifecycleController, id: &str, event_type: EventType, text: &str, days_ago: i64) {
        let payload = match event_type {
            EventType::CaptionChoice => DecisionPayload::Caption {
                text: "caption".into(),
                style_tags: vec![],
            },
            _ => DecisionPayload::Verdict {
                verdict: Verdict::Keep,
                traits: vec![],
            },
        };
        let event = DecisionEvent::new(id, event_type, format!("media/{}", id), payload, text)
            .with_occurred_at(Utc::now() - ChronoDuration::days(days_ago));
        let embedding = HashEmbedding::new(DIM).embed(text).await.unwrap();
        lifecycle
            .store()
            .upsert(StoredDecision::new(event, embedding))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_similarity() {
        let f = fixture(Duration::ZERO);
        f.lifecycle.start().await.unwrap();
        seed(&f.lifecycle, "beach", EventType::TriageVerdict, "sunset at the beach kept", 1).await;
        seed(&f.lifecycle, "receipt", EventType::TriageVerdict, "blurry receipt discarded", 1).await;

        let outcome = f
            .service
            .retrieve(RetrievalQuery::new("beach sunset"), Duration::from_secs(2))
            .await;
        let hits = outcome.hits().unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].event.event_id, "beach");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_equal_scores_return_most_recent_first() {
        let f = fixture(Duration::ZERO);
        f.lifecycle.start().await.unwrap();
        seed(&f.lifecycle, "old", EventType::TriageVerdict, "kept the portrait", 30).await;
        seed(&f.lifecycle, "new", EventType::TriageVerdict, "kept the portrait", 1).await;

        let outcome = f
            .service
            .retrieve(RetrievalQuery::new("kept the portrait"), Duration::from_secs(2))
            .await;
        let ids: Vec<_> = outcome
            .hits()
            .unwrap()
            .iter()
            .map(|h| h.event.event_id.as_str())
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_category_filter_and_k() {
        let f = fixture(Duration::ZERO);
        f.lifecycle.start().await.unwrap();
        for i in 0..6 {
            seed(&f.lifecycle, &format!("v{}", i), EventType::TriageVerdict, "golden hour", i).await;
        }
        seed(&f.lifecycle, "c1", EventType::CaptionChoice, "golden hour caption", 0).await;

        let all = f
            .service
            .retrieve(RetrievalQuery::new("golden hour"), Duration::from_secs(2))
            .await;
        assert_eq!(all.hits().unwrap().len(), 5);

        let captions = f
            .service
            .retrieve(
                RetrievalQuery::new("golden hour").with_category(EventType::CaptionChoice),
                Duration::from_secs(2),
            )
            .await;
        let hits = captions.hits().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event.event_id, "c1");

        let capped = f
            .service
            .retrieve(RetrievalQuery::new("golden hour").with_k(1_000), Duration::from_secs(2))
            .await;
        assert_eq!(capped.hits().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_stopped_store_returns_unavailable_within_budget_and_starts() {
        let f = fixture(Duration::from_millis(300));
        assert_eq!(f.lifecycle.state(), StoreState::Stopped);

        let budget = Duration::from_millis(50);
        let started = Instant::now();
        let outcome = f.service.retrieve(RetrievalQuery::new("anything"), budget).await;
        assert!(started.elapsed() < budget + Duration::from_millis(100));
        assert_eq!(
            outcome,
            RetrievalOutcome::Unavailable {
                reason: UnavailableReason::StoreStopped
            }
        );
        // A start was triggered and is still running.
        assert_eq!(f.lifecycle.state(), StoreState::Starting);
        f.lifecycle.start().await.unwrap();
        assert_eq!(f.lifecycle.state(), StoreState::Running);
    }

    #[tokio::test]
    async fn test_retrieve_is_read_only() {
        let f = fixture(Duration::ZERO);
        f.lifecycle.start().await.unwrap();
        seed(&f.lifecycle, "a", EventType::TriageVerdict, "harbour at dusk", 1).await;

        let before = f.lifecycle.store().count().await.unwrap();
        f.service
            .retrieve(RetrievalQuery::new("harbour"), Duration::from_secs(2))
            .await;
        assert_eq!(f.lifecycle.store().count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_blank_query_returns_no_hits() {
        let f = fixture(Duration::ZERO);
        let outcome = f
            .service
            .retrieve(RetrievalQuery::new("   "), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, RetrievalOutcome::Hits { hits: vec![] });
        assert_eq!(f.lifecycle.state(), StoreState::Stopped);
    }

    #[tokio::test]
    async fn test_outcome_serialization() {
        let unavailable = RetrievalOutcome::Unavailable {
            reason: UnavailableReason::Timeout,
        };
        let json = serde_json::to_value(&unavailable).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "timeout");

        let hits = serde_json::to_value(RetrievalOutcome::Hits { hits: vec![] }).unwrap();
        assert_eq!(hits["status"], "ok");
    }

    #[tokio::test]
    async fn test_context_provider_falls_back_to_profile() {
        let f = fixture(Duration::from_millis(300));
        let cache = Arc::new(SqliteProfileCache::new(f.db.clone()));
        let provider = ContextProvider::new(
            f.service.clone(),
            ProfileReader::new(cache.clone()),
            "default",
        );

        let context = provider
            .context_for(RetrievalQuery::new("portrait"), Duration::from_millis(20))
            .await;
        assert_eq!(context, MemoryContext::Empty);

        let profile = PreferenceProfile {
            profile_version: 1,
            scope: "default".into(),
            built_at: Utc::now(),
            decision_count: 3,
            rule_based_stats: RuleBasedStats::default(),
            narrative_summary: None,
            style_examples: vec![],
        };
        cache.replace(&profile).await.unwrap();

        let context = provider
            .context_for(RetrievalQuery::new("portrait"), Duration::from_millis(20))
            .await;
        assert!(matches!(context, MemoryContext::Profile { profile } if profile.profile_version == 1));
    }

    #[tokio::test]
    async fn test_context_provider_prefers_decisions() {
        let f = fixture(Duration::ZERO);
        f.lifecycle.start().await.unwrap();
        seed(&f.lifecycle, "a", EventType::TriageVerdict, "portrait in window light", 1).await;

        let provider = ContextProvider::new(
            f.service.clone(),
            ProfileReader::new(Arc::new(SqliteProfileCache::new(f.db.clone()))),
            "default",
        );
        let context = provider
            .context_for(RetrievalQuery::new("portrait"), Duration::from_secs(2))
            .await;
        assert!(matches!(context, MemoryContext::Decisions { decisions } if decisions.len() == 1));
    }
}
