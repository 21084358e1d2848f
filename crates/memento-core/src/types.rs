use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Enums
// =============================================================================

/// The kind of decision a Decision Event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Keep/discard verdict from media triage.
    TriageVerdict,
    /// The user replaced a recommended selection with another item.
    SelectionOverride,
    /// The user picked (or edited) a caption and its style.
    CaptionChoice,
    /// An item was published to a channel.
    PublishAction,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::TriageVerdict,
        EventType::SelectionOverride,
        EventType::CaptionChoice,
        EventType::PublishAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TriageVerdict => "triage-verdict",
            EventType::SelectionOverride => "selection-override",
            EventType::CaptionChoice => "caption-choice",
            EventType::PublishAction => "publish-action",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "triage-verdict" => Some(EventType::TriageVerdict),
            "selection-override" => Some(EventType::SelectionOverride),
            "caption-choice" => Some(EventType::CaptionChoice),
            "publish-action" => Some(EventType::PublishAction),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triage outcome for a media item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Keep,
    Discard,
}

/// Structured decision detail carried by a Decision Event.
///
/// The `kind` tag must agree with the event's [`EventType`]; see
/// [`DecisionPayload::matches`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionPayload {
    Verdict {
        verdict: Verdict,
        /// Subject traits the verdict applies to (e.g. "low-light", "portrait").
        #[serde(default)]
        traits: Vec<String>,
    },
    Override {
        #[serde(default)]
        from_ref: Option<String>,
        to_ref: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        traits: Vec<String>,
    },
    Caption {
        text: String,
        #[serde(default)]
        style_tags: Vec<String>,
    },
    Publish {
        channel: String,
    },
}

impl DecisionPayload {
    /// Wire name of the payload kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DecisionPayload::Verdict { .. } => "verdict",
            DecisionPayload::Override { .. } => "override",
            DecisionPayload::Caption { .. } => "caption",
            DecisionPayload::Publish { .. } => "publish",
        }
    }

    /// Whether this payload is the one expected for `event_type`.
    pub fn matches(&self, event_type: EventType) -> bool {
        matches!(
            (self, event_type),
            (DecisionPayload::Verdict { .. }, EventType::TriageVerdict)
                | (DecisionPayload::Override { .. }, EventType::SelectionOverride)
                | (DecisionPayload::Caption { .. }, EventType::CaptionChoice)
                | (DecisionPayload::Publish { .. }, EventType::PublishAction)
        )
    }
}

/// Lifecycle state of the vector store.
///
/// `Stopped -> Starting -> Running -> IdleRunning -> Stopped`, with
/// `Starting -> Stopped` on a failed start and `IdleRunning -> Running` when
/// activity resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Stopped,
    Starting,
    Running,
    IdleRunning,
}

impl StoreState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &StoreState) -> bool {
        matches!(
            (self, target),
            (StoreState::Stopped, StoreState::Starting)
                | (StoreState::Starting, StoreState::Running)
                | (StoreState::Starting, StoreState::Stopped)
                | (StoreState::Running, StoreState::IdleRunning)
                | (StoreState::IdleRunning, StoreState::Running)
                | (StoreState::IdleRunning, StoreState::Stopped)
        )
    }

    /// Whether reads and writes can be served in this state.
    pub fn is_available(&self) -> bool {
        matches!(self, StoreState::Running | StoreState::IdleRunning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::Stopped => "stopped",
            StoreState::Starting => "starting",
            StoreState::Running => "running",
            StoreState::IdleRunning => "idle_running",
        }
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds since epoch.
///
/// Used for subsystem event stamps where second precision is enough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

// =============================================================================
// Entity Structs
// =============================================================================

/// An immutable record of one user or system decision about a media item.
///
/// String fields default to empty when absent on the wire so that
/// [`DecisionEvent::validate`] can report precisely which one is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    /// Producer-assigned idempotency key.
    #[serde(default)]
    pub event_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub subject_ref: String,
    pub payload: DecisionPayload,
    /// Denormalized text used for embedding.
    #[serde(default)]
    pub context_text: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub session_ref: String,
}

impl DecisionEvent {
    pub fn new(
        event_id: impl Into<String>,
        event_type: EventType,
        subject_ref: impl Into<String>,
        payload: DecisionPayload,
        context_text: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            subject_ref: subject_ref.into(),
            payload,
            context_text: context_text.into(),
            occurred_at: Utc::now(),
            session_ref: String::new(),
        }
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn with_session(mut self, session_ref: impl Into<String>) -> Self {
        self.session_ref = session_ref.into();
        self
    }

    /// Check required fields and payload consistency.
    ///
    /// `max_context_len` bounds `context_text` in bytes; pass `usize::MAX` to
    /// disable the check.
    pub fn validate(&self, max_context_len: usize) -> Result<(), ValidationError> {
        if self.event_id.trim().is_empty() {
            return Err(ValidationError::MissingEventId);
        }
        if self.subject_ref.trim().is_empty() {
            return Err(ValidationError::MissingSubjectRef);
        }
        if self.context_text.trim().is_empty() {
            return Err(ValidationError::MissingContextText);
        }
        if self.context_text.len() > max_context_len {
            return Err(ValidationError::ContextTooLong {
                len: self.context_text.len(),
                limit: max_context_len,
            });
        }
        if !self.payload.matches(self.event_type) {
            return Err(ValidationError::PayloadMismatch {
                event_type: self.event_type.as_str().to_string(),
                payload: self.payload.kind().to_string(),
            });
        }
        if let DecisionPayload::Caption { text, .. } = &self.payload {
            if text.trim().is_empty() {
                return Err(ValidationError::EmptyCaption);
            }
        }
        Ok(())
    }
}

/// A Decision Event together with its embedding, as held by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDecision {
    pub event: DecisionEvent,
    pub embedding: Vec<f32>,
    pub stored_at: DateTime<Utc>,
}

impl StoredDecision {
    pub fn new(event: DecisionEvent, embedding: Vec<f32>) -> Self {
        Self {
            event,
            embedding,
            stored_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event.event_id
    }
}

/// A stored decision returned from similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDecision {
    pub event: DecisionEvent,
    /// Cosine similarity to the query (-1.0 to 1.0).
    pub score: f64,
}

// =============================================================================
// Preference Profile
// =============================================================================

/// Count and share of one decision category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: u64,
    /// Fraction of all decisions in scope.
    pub share: f64,
}

/// Per-trait triage and override counts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraitStats {
    pub keep: u64,
    pub discard: u64,
    pub overrides: u64,
    /// `keep / (keep + discard)`, absent when the trait was never triaged.
    pub keep_rate: Option<f64>,
}

/// Deterministic, rule-based aggregates over the decisions in scope.
///
/// All maps are ordered so that two builds over the same decisions serialize
/// to identical bytes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleBasedStats {
    pub total_decisions: u64,
    pub distinct_subjects: u64,
    pub distinct_sessions: u64,
    pub categories: BTreeMap<String, CategoryStats>,
    pub keep_count: u64,
    pub discard_count: u64,
    pub keep_rate: Option<f64>,
    pub traits: BTreeMap<String, TraitStats>,
    pub override_count: u64,
    /// Overrides per triage verdict.
    pub override_frequency: Option<f64>,
    pub caption_style_tags: BTreeMap<String, u64>,
    pub publish_channels: BTreeMap<String, u64>,
}

/// Compact preference representation used at prompt-construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceProfile {
    pub profile_version: u64,
    pub scope: String,
    pub built_at: DateTime<Utc>,
    pub decision_count: u64,
    pub rule_based_stats: RuleBasedStats,
    /// Absent when narrative generation failed or was disabled.
    pub narrative_summary: Option<String>,
    /// Representative caption exemplars, most recent first.
    pub style_examples: Vec<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn caption_event(text: &str) -> DecisionEvent {
        DecisionEvent::new(
            "evt-1",
            EventType::CaptionChoice,
            "media/IMG_0001.jpg",
            DecisionPayload::Caption {
                text: text.to_string(),
                style_tags: vec!["playful".into()],
            },
            "Sunset over the harbour, warm tones",
        )
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::TriageVerdict).unwrap();
        assert_eq!(json, "\"triage-verdict\"");
        let rt: EventType = serde_json::from_str("\"selection-override\"").unwrap();
        assert_eq!(rt, EventType::SelectionOverride);
    }

    #[test]
    fn test_event_type_parse_matches_as_str() {
        for t in EventType::ALL {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EventType::parse("unknown"), None);
    }

    #[test]
    fn test_payload_tagging() {
        let payload = DecisionPayload::Verdict {
            verdict: Verdict::Keep,
            traits: vec!["portrait".into()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "verdict");
        assert_eq!(json["verdict"], "keep");
    }

    #[test]
    fn test_payload_matches_event_type() {
        let publish = DecisionPayload::Publish {
            channel: "instagram".into(),
        };
        assert!(publish.matches(EventType::PublishAction));
        assert!(!publish.matches(EventType::CaptionChoice));
    }

    #[test]
    fn test_validate_accepts_well_formed_event() {
        assert!(caption_event("Golden hour").validate(usize::MAX).is_ok());
    }

    #[test]
    fn test_validate_missing_context_text() {
        let mut event = caption_event("Golden hour");
        event.context_text = "   ".into();
        assert_eq!(
            event.validate(usize::MAX),
            Err(ValidationError::MissingContextText)
        );
    }

    #[test]
    fn test_validate_missing_ids() {
        let mut event = caption_event("Golden hour");
        event.event_id.clear();
        assert_eq!(event.validate(usize::MAX), Err(ValidationError::MissingEventId));

        let mut event = caption_event("Golden hour");
        event.subject_ref.clear();
        assert_eq!(
            event.validate(usize::MAX),
            Err(ValidationError::MissingSubjectRef)
        );
    }

    #[test]
    fn test_validate_payload_mismatch() {
        let mut event = caption_event("Golden hour");
        event.event_type = EventType::TriageVerdict;
        let err = event.validate(usize::MAX).unwrap_err();
        assert_eq!(err.reason_code(), "payload_mismatch");
    }

    #[test]
    fn test_validate_empty_caption() {
        let event = caption_event("");
        assert_eq!(event.validate(usize::MAX), Err(ValidationError::EmptyCaption));
    }

    #[test]
    fn test_validate_context_too_long() {
        let event = caption_event("Golden hour");
        let err = event.validate(8).unwrap_err();
        assert!(matches!(err, ValidationError::ContextTooLong { limit: 8, .. }));
    }

    #[test]
    fn test_missing_context_text_deserializes_as_empty() {
        let json = serde_json::json!({
            "event_id": "evt-9",
            "event_type": "publish-action",
            "subject_ref": "media/9",
            "payload": {"kind": "publish", "channel": "blog"},
            "occurred_at": "2026-01-01T00:00:00Z"
        });
        let event: DecisionEvent = serde_json::from_value(json).unwrap();
        assert!(event.context_text.is_empty());
        assert!(event.session_ref.is_empty());
        assert_eq!(
            event.validate(usize::MAX),
            Err(ValidationError::MissingContextText)
        );
    }

    #[test]
    fn test_store_state_transitions() {
        assert!(StoreState::Stopped.can_transition_to(&StoreState::Starting));
        assert!(StoreState::Starting.can_transition_to(&StoreState::Running));
        assert!(StoreState::Starting.can_transition_to(&StoreState::Stopped));
        assert!(StoreState::Running.can_transition_to(&StoreState::IdleRunning));
        assert!(StoreState::IdleRunning.can_transition_to(&StoreState::Running));
        assert!(StoreState::IdleRunning.can_transition_to(&StoreState::Stopped));

        assert!(!StoreState::Stopped.can_transition_to(&StoreState::Running));
        assert!(!StoreState::Running.can_transition_to(&StoreState::Stopped));
        assert!(!StoreState::Running.can_transition_to(&StoreState::Starting));
    }

    #[test]
    fn test_store_state_availability() {
        assert!(StoreState::Running.is_available());
        assert!(StoreState::IdleRunning.is_available());
        assert!(!StoreState::Starting.is_available());
        assert!(!StoreState::Stopped.is_available());
    }

    #[test]
    fn test_timestamp_to_datetime_roundtrip() {
        let now = Utc::now();
        let ts = Timestamp::from_datetime(now);
        assert_eq!(ts.to_datetime().timestamp(), now.timestamp());
    }

    #[test]
    fn test_rule_based_stats_serialization_is_stable() {
        let mut stats = RuleBasedStats::default();
        stats.caption_style_tags.insert("minimal".into(), 2);
        stats.caption_style_tags.insert("emoji".into(), 1);
        let a = serde_json::to_string(&stats).unwrap();
        let b = serde_json::to_string(&stats.clone()).unwrap();
        assert_eq!(a, b);
        // BTreeMap keeps keys sorted.
        assert!(a.find("emoji").unwrap() < a.find("minimal").unwrap());
    }
}
