//! Producer-side facade over the event queue.
//!
//! Producers are interactive features (triage, captioning, publishing). They
//! must never fail or wait because the memory subsystem is unhealthy, so
//! publishing swallows transport errors after logging and counting them in
//! `memento_events_published_total{status="failed"}`.

use std::sync::Arc;

use tracing::{debug, warn};

use memento_core::types::DecisionEvent;
use memento_storage::EventQueue;

use crate::metrics;

pub struct DecisionPublisher {
    queue: Arc<EventQueue>,
}

impl DecisionPublisher {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue a decision event. Returns the queue message id on success.
    pub fn publish(&self, event: &DecisionEvent) -> Option<String> {
        match self.queue.publish(event) {
            Ok(message_id) => {
                metrics::event_published(true);
                debug!(event_id = %event.event_id, message_id = %message_id, "Decision published");
                Some(message_id)
            }
            Err(e) => {
                metrics::event_published(false);
                warn!(event_id = %event.event_id, error = %e, "Failed to publish decision");
                None
            }
        }
    }

    /// Enqueue an unparsed payload. Malformed input is accepted here and
    /// dead-lettered by the worker.
    pub fn publish_raw(&self, payload: &str) -> Option<String> {
        match self.queue.publish_raw(payload) {
            Ok(message_id) => {
                metrics::event_published(true);
                Some(message_id)
            }
            Err(e) => {
                metrics::event_published(false);
                warn!(error = %e, "Failed to publish raw decision payload");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memento_core::types::{DecisionPayload, EventType};
    use memento_storage::Database;

    fn caption(id: &str) -> DecisionEvent {
        DecisionEvent::new(
            id,
            EventType::CaptionChoice,
            "media/7",
            DecisionPayload::Caption {
                text: "Golden hour at the pier".into(),
                style_tags: vec!["short".into()],
            },
            "picked the shorter caption",
        )
    }

    #[test]
    fn test_publish_enqueues() {
        let db = Arc::new(Database::in_memory().unwrap());
        let queue = Arc::new(EventQueue::new(db));
        let publisher = DecisionPublisher::new(queue.clone());

        assert!(publisher.publish(&caption("c1")).is_some());
        assert!(publisher.publish_raw("{broken").is_some());
        assert_eq!(queue.depth().unwrap(), 2);
    }

    #[test]
    fn test_transport_failure_is_not_surfaced() {
        let db = Arc::new(Database::in_memory().unwrap());
        db.with_conn(|conn| {
            conn.execute("DROP TABLE event_queue", [])
                .map_err(|e| memento_core::error::MementoError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();
        let publisher = DecisionPublisher::new(Arc::new(EventQueue::new(db)));

        assert!(publisher.publish(&caption("c1")).is_none());
        assert!(publisher.publish_raw("{}").is_none());
    }
}
