//! Preference profile builder.
//!
//! A build scans the decisions in the lookback window, aggregates rule-based
//! statistics, optionally adds a narrative and atomically replaces the
//! cached profile for its scope. Builds are single-flight: a run that finds
//! another in progress is skipped, not queued. Any failure before the final
//! replace leaves the previous profile current.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use memento_core::config::ProfileConfig;
use memento_core::events::MemoryEvent;
use memento_core::types::{PreferenceProfile, RuleBasedStats, Timestamp};
use memento_storage::ProfileCache;
use memento_vector::LifecycleController;

use crate::error::ProfileError;
use crate::narrator::NarrativeGenerator;
use crate::stats::StatsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another build holds the run lock.
    AlreadyRunning,
    /// The vector store did not come up within the start budget.
    StoreUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyRunning => "already_running",
            SkipReason::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    Published {
        version: u64,
        decision_count: u64,
        narrative: bool,
    },
    Skipped { reason: SkipReason },
}

pub struct ProfileBuilder {
    lifecycle: LifecycleController,
    cache: Arc<dyn ProfileCache>,
    narrator: Option<Arc<dyn NarrativeGenerator>>,
    config: ProfileConfig,
    run_lock: Mutex<()>,
    events: Option<broadcast::Sender<MemoryEvent>>,
}

impl ProfileBuilder {
    pub fn new(
        lifecycle: LifecycleController,
        cache: Arc<dyn ProfileCache>,
        config: ProfileConfig,
    ) -> Self {
        Self {
            lifecycle,
            cache,
            narrator: None,
            config,
            run_lock: Mutex::new(()),
            events: None,
        }
    }

    /// Attach a narrative generator. Ignored when narratives are disabled.
    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<MemoryEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn scope(&self) -> &str {
        &self.config.scope
    }

    pub fn cache(&self) -> &Arc<dyn ProfileCache> {
        &self.cache
    }

    /// Run one build.
    pub async fn run(&self) -> Result<BuildOutcome, ProfileError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Ok(self.skip(SkipReason::AlreadyRunning));
        };

        if !self
            .lifecycle
            .wait_until_available(self.config.start_budget())
            .await
        {
            return Ok(self.skip(SkipReason::StoreUnavailable));
        }

        match self.build().await {
            Ok(profile) => {
                info!(
                    scope = %profile.scope,
                    version = profile.profile_version,
                    decisions = profile.decision_count,
                    narrative = profile.narrative_summary.is_some(),
                    "Preference profile published"
                );
                self.emit(MemoryEvent::ProfilePublished {
                    scope: profile.scope.clone(),
                    version: profile.profile_version,
                    decision_count: profile.decision_count,
                    has_narrative: profile.narrative_summary.is_some(),
                    timestamp: Timestamp::now(),
                });
                Ok(BuildOutcome::Published {
                    version: profile.profile_version,
                    decision_count: profile.decision_count,
                    narrative: profile.narrative_summary.is_some(),
                })
            }
            Err(e) => {
                warn!(error = %e, "Preference profile build failed");
                self.emit(MemoryEvent::ProfileBuildFailed {
                    error: e.to_string(),
                    timestamp: Timestamp::now(),
                });
                Err(e)
            }
        }
    }

    async fn build(&self) -> Result<PreferenceProfile, ProfileError> {
        self.lifecycle.record_activity();

        let since = self
            .config
            .lookback_days
            .map(|days| Utc::now() - ChronoDuration::days(i64::from(days)));
        let decisions = self
            .lifecycle
            .store()
            .scan(since)
            .await
            .map_err(|e| ProfileError::Store(e.to_string()))?;

        let stats = StatsAggregator::compute(&decisions);
        let style_examples = StatsAggregator::style_examples(&decisions, self.config.style_examples);
        let narrative_summary = self.narrate(&stats, &style_examples).await;

        let previous = self
            .cache
            .current(&self.config.scope)
            .await
            .map_err(|e| ProfileError::Cache(e.to_string()))?
            .map(|p| p.profile_version)
            .unwrap_or(0);

        let profile = PreferenceProfile {
            profile_version: previous + 1,
            scope: self.config.scope.clone(),
            built_at: Utc::now(),
            decision_count: stats.total_decisions,
            rule_based_stats: stats,
            narrative_summary,
            style_examples,
        };

        self.cache
            .replace(&profile)
            .await
            .map_err(|e| ProfileError::Cache(e.to_string()))?;
        Ok(profile)
    }

    async fn narrate(&self, stats: &RuleBasedStats, style_examples: &[String]) -> Option<String> {
        if !self.config.narrative_enabled {
            return None;
        }
        let narrator = self.narrator.as_ref()?;

        match tokio::time::timeout(
            self.config.narrative_timeout(),
            narrator.generate(stats, style_examples),
        )
        .await
        {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!(narrator = narrator.name(), error = %e, "Narrative generation failed");
                None
            }
            Err(_) => {
                warn!(
                    narrator = narrator.name(),
                    timeout_secs = self.config.narrative_timeout_secs,
                    "Narrative generation timed out"
                );
                None
            }
        }
    }

    fn skip(&self, reason: SkipReason) -> BuildOutcome {
        info!(reason = reason.as_str(), "Preference profile build skipped");
        self.emit(MemoryEvent::ProfileBuildSkipped {
            reason: reason.as_str().to_string(),
            timestamp: Timestamp::now(),
        });
        BuildOutcome::Skipped { reason }
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
