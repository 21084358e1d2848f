//! Dead-letter sink for deliveries the ingestion worker gave up on.
//!
//! Entries hold the raw payload exactly as received plus a machine-readable
//! reason code. They stay until an operator discards or requeues them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use memento_core::error::MementoError;

use crate::db::{storage_err, Database};
use crate::queue::{extract_keys, insert_message, millis_to_datetime};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: String,
    pub event_id: Option<String>,
    pub raw_payload: String,
    /// Stable code such as `missing_context_text` or `embedding_failed`.
    pub reason_code: String,
    pub detail: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

pub struct DeadLetterSink {
    db: Arc<Database>,
}

impl DeadLetterSink {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a failed delivery.
    pub fn dead_letter(
        &self,
        event_id: Option<&str>,
        raw_payload: &str,
        reason_code: &str,
        detail: &str,
        attempts: u32,
    ) -> Result<DeadLetterEntry, MementoError> {
        let entry = new_entry(event_id, raw_payload, reason_code, detail, attempts);
        self.db.with_conn(|conn| insert_entry(conn, &entry))?;
        log_dead_lettered(&entry);
        Ok(entry)
    }

    /// Dead-letter a leased queue message and remove it from the queue in
    /// one transaction, so a crash between the two cannot dead-letter the
    /// same delivery twice.
    pub fn dead_letter_message(
        &self,
        message_id: &str,
        event_id: Option<&str>,
        raw_payload: &str,
        reason_code: &str,
        detail: &str,
        attempts: u32,
    ) -> Result<DeadLetterEntry, MementoError> {
        let entry = new_entry(event_id, raw_payload, reason_code, detail, attempts);
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(storage_err("Failed to begin dead-letter"))?;
            insert_entry(&tx, &entry)?;
            tx.execute(
                "DELETE FROM event_queue WHERE message_id = ?1",
                params![message_id],
            )
            .map_err(storage_err("Failed to remove dead-lettered message"))?;
            tx.commit().map_err(storage_err("Failed to commit dead-letter"))
        })?;
        log_dead_lettered(&entry);
        Ok(entry)
    }

    /// Most recent entries first.
    pub fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, MementoError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, event_id, raw_payload, reason_code, detail, attempts, failed_at
                     FROM dead_letters
                     ORDER BY failed_at DESC, id ASC
                     LIMIT ?1",
                )
                .map_err(storage_err("Failed to prepare dead letter list"))?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_entry)
                .map_err(storage_err("Failed to list dead letters"))?;
            let entries = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to read dead letter"))?;
            Ok(entries)
        })
    }

    pub fn count(&self) -> Result<u64, MementoError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))
                .map_err(storage_err("Failed to count dead letters"))?;
            Ok(n as u64)
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>, MementoError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, event_id, raw_payload, reason_code, detail, attempts, failed_at
                 FROM dead_letters WHERE id = ?1",
                params![id],
                row_to_entry,
            )
            .optional()
            .map_err(storage_err("Failed to get dead letter"))
        })
    }

    /// Operator action: drop an entry for good. Returns false if not found.
    pub fn discard(&self, id: &str) -> Result<bool, MementoError> {
        let removed = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM dead_letters WHERE id = ?1", params![id])
                .map_err(storage_err("Failed to discard dead letter"))
        })?;
        if removed > 0 {
            info!(dead_letter_id = %id, "Dead letter discarded");
        }
        Ok(removed > 0)
    }

    /// Operator action: put the raw payload back on the event queue and
    /// remove the entry, in one transaction.
    ///
    /// Returns the new queue message id, or `None` if the entry was not found.
    pub fn requeue(&self, id: &str) -> Result<Option<String>, MementoError> {
        let message_id = self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(storage_err("Failed to begin requeue"))?;

            let raw: Option<String> = tx
                .query_row(
                    "SELECT raw_payload FROM dead_letters WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to read dead letter"))?;

            let Some(raw) = raw else {
                return Ok(None);
            };

            let (event_id, partition_key) = extract_keys(&raw);
            let message_id =
                insert_message(&tx, event_id.as_deref(), partition_key.as_deref(), &raw)?;
            tx.execute("DELETE FROM dead_letters WHERE id = ?1", params![id])
                .map_err(storage_err("Failed to remove requeued dead letter"))?;
            tx.commit().map_err(storage_err("Failed to commit requeue"))?;
            Ok(Some(message_id))
        })?;

        if let Some(ref message_id) = message_id {
            info!(dead_letter_id = %id, message_id = %message_id, "Dead letter requeued");
        }
        Ok(message_id)
    }
}

fn new_entry(
    event_id: Option<&str>,
    raw_payload: &str,
    reason_code: &str,
    detail: &str,
    attempts: u32,
) -> DeadLetterEntry {
    DeadLetterEntry {
        id: Uuid::new_v4().to_string(),
        event_id: event_id.map(str::to_string),
        raw_payload: raw_payload.to_string(),
        reason_code: reason_code.to_string(),
        detail: detail.to_string(),
        attempts,
        failed_at: Utc::now(),
    }
}

fn insert_entry(conn: &Connection, entry: &DeadLetterEntry) -> Result<(), MementoError> {
    conn.execute(
        "INSERT INTO dead_letters
            (id, event_id, raw_payload, reason_code, detail, attempts, failed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.event_id,
            entry.raw_payload,
            entry.reason_code,
            entry.detail,
            entry.attempts,
            entry.failed_at.timestamp_millis(),
        ],
    )
    .map_err(storage_err("Failed to write dead letter"))?;
    Ok(())
}

fn log_dead_lettered(entry: &DeadLetterEntry) {
    warn!(
        dead_letter_id = %entry.id,
        event_id = ?entry.event_id,
        reason = %entry.reason_code,
        attempts = entry.attempts,
        "Delivery dead-lettered"
    );
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
    let attempts: i64 = row.get(5)?;
    let failed_at: i64 = row.get(6)?;
    Ok(DeadLetterEntry {
        id: row.get(0)?,
        event_id: row.get(1)?,
        raw_payload: row.get(2)?,
        reason_code: row.get(3)?,
        detail: row.get(4)?,
        attempts: attempts as u32,
        failed_at: millis_to_datetime(failed_at),
    })
}
