//! Durable SQLite-backed event transport.
//!
//! Messages are delivered at least once: `receive` leases a message for a
//! visibility window, and a message that is neither acked nor nacked before
//! the window closes becomes visible again. Delivery order follows the
//! insertion sequence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use memento_core::error::MementoError;
use memento_core::types::DecisionEvent;

use crate::db::{storage_err, Database};

/// A message leased from the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMessage {
    pub message_id: String,
    pub seq: i64,
    /// `event_id` extracted at publish time, when the payload had one.
    pub event_id: Option<String>,
    pub payload: String,
    /// Number of times this message has been leased, including this one.
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Event transport backed by the `event_queue` table.
pub struct EventQueue {
    db: Arc<Database>,
}

impl EventQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a decision event. The partition key is its `subject_ref`.
    pub fn publish(&self, event: &DecisionEvent) -> Result<String, MementoError> {
        let payload = serde_json::to_string(event)?;
        self.db.with_conn(|conn| {
            insert_message(
                conn,
                Some(event.event_id.as_str()),
                Some(event.subject_ref.as_str()),
                &payload,
            )
        })
    }

    /// Append a raw payload without validating it.
    ///
    /// Identifiers are extracted on a best-effort basis so that malformed
    /// payloads still travel through the queue and reach the dead-letter sink.
    pub fn publish_raw(&self, payload: &str) -> Result<String, MementoError> {
        let (event_id, partition_key) = extract_keys(payload);
        self.db.with_conn(|conn| {
            insert_message(conn, event_id.as_deref(), partition_key.as_deref(), payload)
        })
    }

    /// Lease up to `batch` visible messages in sequence order.
    ///
    /// Every leased message has its `delivery_count` incremented and stays
    /// hidden for `visibility`.
    pub fn receive(
        &self,
        batch: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage>, MementoError> {
        if batch == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now().timestamp_millis();
        let hidden_until = now + duration_ms(visibility);

        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(storage_err("Failed to begin receive"))?;

            let messages = {
                let mut stmt = tx
                    .prepare(
                        "SELECT seq, message_id, event_id, payload, delivery_count, enqueued_at
                         FROM event_queue
                         WHERE visible_at <= ?1
                         ORDER BY seq ASC
                         LIMIT ?2",
                    )
                    .map_err(storage_err("Failed to prepare receive"))?;

                let rows = stmt
                    .query_map(params![now, batch as i64], |row| {
                        let delivery_count: i64 = row.get(4)?;
                        let enqueued_at: i64 = row.get(5)?;
                        Ok(QueuedMessage {
                            seq: row.get(0)?,
                            message_id: row.get(1)?,
                            event_id: row.get(2)?,
                            payload: row.get(3)?,
                            delivery_count: (delivery_count + 1) as u32,
                            enqueued_at: millis_to_datetime(enqueued_at),
                        })
                    })
                    .map_err(storage_err("Failed to query queue"))?;

                let messages = rows
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(storage_err("Failed to read queue row"))?;
                messages
            };

            for msg in &messages {
                tx.execute(
                    "UPDATE event_queue
                     SET visible_at = ?1, delivery_count = delivery_count + 1
                     WHERE seq = ?2",
                    params![hidden_until, msg.seq],
                )
                .map_err(storage_err("Failed to lease message"))?;
            }

            tx.commit().map_err(storage_err("Failed to commit receive"))?;
            Ok(messages)
        })
    }

    /// Remove a processed message. Returns false if it was already gone.
    pub fn ack(&self, message_id: &str) -> Result<bool, MementoError> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "DELETE FROM event_queue WHERE message_id = ?1",
                    params![message_id],
                )
                .map_err(storage_err("Failed to ack message"))?;
            Ok(n > 0)
        })
    }

    /// Return a message to the queue, visible again after `delay`.
    pub fn nack(&self, message_id: &str, delay: Duration) -> Result<bool, MementoError> {
        let visible_at = Utc::now().timestamp_millis() + duration_ms(delay);
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE event_queue SET visible_at = ?1 WHERE message_id = ?2",
                    params![visible_at, message_id],
                )
                .map_err(storage_err("Failed to nack message"))?;
            debug!(message_id, delay_ms = duration_ms(delay), "Message nacked");
            Ok(n > 0)
        })
    }

    /// Number of messages not yet acked, leased or not.
    pub fn depth(&self) -> Result<u64, MementoError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM event_queue", [], |row| row.get(0))
                .map_err(storage_err("Failed to count queue"))?;
            Ok(n as u64)
        })
    }
}

/// Insert a message row on an existing connection.
///
/// Shared with the dead-letter requeue path so both writes can share one
/// transaction.
pub(crate) fn insert_message(
    conn: &Connection,
    event_id: Option<&str>,
    partition_key: Option<&str>,
    payload: &str,
) -> Result<String, MementoError> {
    let message_id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO event_queue
            (message_id, event_id, partition_key, payload, enqueued_at, visible_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![message_id, event_id, partition_key, payload, now],
    )
    .map_err(storage_err("Failed to enqueue message"))?;
    debug!(message_id = %message_id, event_id = ?event_id, "Message enqueued");
    Ok(message_id)
}

pub(crate) fn extract_keys(payload: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
        return (None, None);
    };
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    (field("event_id"), field("subject_ref"))
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 2)
}
