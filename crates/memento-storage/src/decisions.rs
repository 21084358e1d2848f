//! Persistence for stored decisions.
//!
//! Backs the vector store: one row per `event_id`, embedding held as a
//! little-endian f32 BLOB. Inserts are first-write-wins. Timestamps are unix
//! nanoseconds so a rebuilt index orders decisions exactly as published.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use memento_core::error::MementoError;
use memento_core::types::{DecisionEvent, DecisionPayload, EventType, StoredDecision};

use crate::db::{storage_err, Database};

const SELECT_COLUMNS: &str = "SELECT event_id, event_type, subject_ref, session_ref, context_text,
            payload, occurred_at, embedding, stored_at
     FROM stored_decisions";

/// Repository for the `stored_decisions` table.
pub struct DecisionRepository {
    db: Arc<Database>,
}

impl DecisionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a decision unless one with the same `event_id` exists.
    ///
    /// Returns true when a row was written.
    pub fn insert(&self, decision: &StoredDecision) -> Result<bool, MementoError> {
        let event = &decision.event;
        let payload = serde_json::to_string(&event.payload)?;
        let blob = encode_embedding(&decision.embedding);

        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "INSERT INTO stored_decisions
                        (event_id, event_type, subject_ref, session_ref, context_text,
                         payload, occurred_at, embedding, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(event_id) DO NOTHING",
                    params![
                        event.event_id,
                        event.event_type.as_str(),
                        event.subject_ref,
                        event.session_ref,
                        event.context_text,
                        payload,
                        to_nanos(&event.occurred_at),
                        blob,
                        to_nanos(&decision.stored_at),
                    ],
                )
                .map_err(storage_err("Failed to insert decision"))?;
            Ok(n > 0)
        })
    }

    pub fn get(&self, event_id: &str) -> Result<Option<StoredDecision>, MementoError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("{} WHERE event_id = ?1", SELECT_COLUMNS),
                    params![event_id],
                    read_row,
                )
                .optional()
                .map_err(storage_err("Failed to get decision"))?;
            row.map(RawDecision::into_stored).transpose()
        })
    }

    /// All decisions that occurred at or after `since`, oldest first.
    pub fn scan(&self, since: Option<DateTime<Utc>>) -> Result<Vec<StoredDecision>, MementoError> {
        let since_ns = since.as_ref().map(to_nanos).unwrap_or(i64::MIN);
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE occurred_at >= ?1 ORDER BY occurred_at ASC, event_id ASC",
                    SELECT_COLUMNS
                ))
                .map_err(storage_err("Failed to prepare decision scan"))?;
            let rows = stmt
                .query_map(params![since_ns], read_row)
                .map_err(storage_err("Failed to scan decisions"))?;

            let mut decisions = Vec::new();
            for row in rows {
                let raw = row.map_err(storage_err("Failed to read decision"))?;
                decisions.push(raw.into_stored()?);
            }
            Ok(decisions)
        })
    }

    pub fn count(&self) -> Result<u64, MementoError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM stored_decisions", [], |row| {
                    row.get(0)
                })
                .map_err(storage_err("Failed to count decisions"))?;
            Ok(n as u64)
        })
    }
}

/// Row as read from SQLite, before JSON and BLOB decoding.
struct RawDecision {
    event_id: String,
    event_type: String,
    subject_ref: String,
    session_ref: String,
    context_text: String,
    payload: String,
    occurred_at: i64,
    embedding: Vec<u8>,
    stored_at: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawDecision> {
    Ok(RawDecision {
        event_id: row.get(0)?,
        event_type: row.get(1)?,
        subject_ref: row.get(2)?,
        session_ref: row.get(3)?,
        context_text: row.get(4)?,
        payload: row.get(5)?,
        occurred_at: row.get(6)?,
        embedding: row.get(7)?,
        stored_at: row.get(8)?,
    })
}

impl RawDecision {
    fn into_stored(self) -> Result<StoredDecision, MementoError> {
        let event_type = EventType::parse(&self.event_type).ok_or_else(|| {
            MementoError::Storage(format!("Unknown event type in store: {}", self.event_type))
        })?;
        let payload: DecisionPayload = serde_json::from_str(&self.payload)?;
        Ok(StoredDecision {
            event: DecisionEvent {
                event_id: self.event_id,
                event_type,
                subject_ref: self.subject_ref,
                payload,
                context_text: self.context_text,
                occurred_at: DateTime::from_timestamp_nanos(self.occurred_at),
                session_ref: self.session_ref,
            },
            embedding: decode_embedding(&self.embedding)?,
            stored_at: DateTime::from_timestamp_nanos(self.stored_at),
        })
    }
}

/// Unix nanoseconds, saturating outside the years 1677..2262.
fn to_nanos(t: &DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(if t.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, MementoError> {
    if bytes.len() % 4 != 0 {
        return Err(MementoError::Storage(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
