use serde::{Deserialize, Serialize};

use crate::types::{EventType, StoreState, Timestamp};

/// Events emitted by the decision-memory subsystem.
///
/// Published on a `tokio::sync::broadcast` channel and consumed by:
/// - The SSE stream (`GET /stream`)
/// - The application log
///
/// Emission is best-effort; a channel with no receivers is not an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MemoryEvent {
    // =========================================================================
    // Ingestion Events
    // =========================================================================
    /// A decision was embedded and written to the vector store.
    DecisionStored {
        event_id: String,
        event_type: EventType,
        timestamp: Timestamp,
    },

    /// A redelivered decision was already present; nothing was written.
    DecisionDuplicate {
        event_id: String,
        timestamp: Timestamp,
    },

    /// A delivery was moved to the dead-letter sink.
    DecisionDeadLettered {
        event_id: Option<String>,
        reason_code: String,
        attempts: u32,
        timestamp: Timestamp,
    },

    /// A transient failure was scheduled for redelivery.
    IngestRetryScheduled {
        event_id: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Lifecycle Events
    // =========================================================================
    StoreStateChanged {
        from: StoreState,
        to: StoreState,
        timestamp: Timestamp,
    },

    /// An activity signal arrived from a user-facing surface.
    UserActivity {
        source: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Retrieval Events
    // =========================================================================
    RetrievalPerformed {
        result_count: usize,
        latency_ms: u64,
        timestamp: Timestamp,
    },

    /// Retrieval returned the explicit unavailable outcome.
    RetrievalUnavailable {
        reason: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Profile Events
    // =========================================================================
    ProfilePublished {
        scope: String,
        version: u64,
        decision_count: u64,
        has_narrative: bool,
        timestamp: Timestamp,
    },

    ProfileBuildSkipped {
        reason: String,
        timestamp: Timestamp,
    },

    /// The build failed; the previous profile remains current.
    ProfileBuildFailed {
        error: String,
        timestamp: Timestamp,
    },
}

impl MemoryEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            MemoryEvent::DecisionStored { timestamp, .. }
            | MemoryEvent::DecisionDuplicate { timestamp, .. }
            | MemoryEvent::DecisionDeadLettered { timestamp, .. }
            | MemoryEvent::IngestRetryScheduled { timestamp, .. }
            | MemoryEvent::StoreStateChanged { timestamp, .. }
            | MemoryEvent::UserActivity { timestamp, .. }
            | MemoryEvent::RetrievalPerformed { timestamp, .. }
            | MemoryEvent::RetrievalUnavailable { timestamp, .. }
            | MemoryEvent::ProfilePublished { timestamp, .. }
            | MemoryEvent::ProfileBuildSkipped { timestamp, .. }
            | MemoryEvent::ProfileBuildFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a human-readable event name for logging and SSE.
    pub fn event_name(&self) -> &'static str {
        match self {
            MemoryEvent::DecisionStored { .. } => "decision_stored",
            MemoryEvent::DecisionDuplicate { .. } => "decision_duplicate",
            MemoryEvent::DecisionDeadLettered { .. } => "decision_dead_lettered",
            MemoryEvent::IngestRetryScheduled { .. } => "ingest_retry_scheduled",
            MemoryEvent::StoreStateChanged { .. } => "store_state_changed",
            MemoryEvent::UserActivity { .. } => "user_activity",
            MemoryEvent::RetrievalPerformed { .. } => "retrieval_performed",
            MemoryEvent::RetrievalUnavailable { .. } => "retrieval_unavailable",
            MemoryEvent::ProfilePublished { .. } => "profile_published",
            MemoryEvent::ProfileBuildSkipped { .. } => "profile_build_skipped",
            MemoryEvent::ProfileBuildFailed { .. } => "profile_build_failed",
        }
    }
}
