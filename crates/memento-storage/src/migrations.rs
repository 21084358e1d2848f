//! Database schema migrations.
//!
//! Version 1 creates the event queue, dead-letter sink, stored decisions and
//! profile cache tables. Version 2 moves stored decision timestamps to
//! nanosecond precision.

use rusqlite::Connection;
use tracing::info;

use memento_core::error::MementoError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), MementoError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| MementoError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| MementoError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: decision_memory");
    }

    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: decision_timestamps_nanos");
    }

    Ok(())
}

/// Version 1: decision memory schema.
///
/// All timestamps are unix milliseconds.
fn apply_v1(conn: &Connection) -> Result<(), MementoError> {
    conn.execute_batch(
        "
        -- Durable event transport. seq gives delivery order.
        CREATE TABLE IF NOT EXISTS event_queue (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id      TEXT NOT NULL UNIQUE,
            event_id        TEXT,
            partition_key   TEXT,
            payload         TEXT NOT NULL,
            enqueued_at     INTEGER NOT NULL,
            visible_at      INTEGER NOT NULL,
            delivery_count  INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_event_queue_visible
            ON event_queue (visible_at, seq);

        -- Deliveries that could not be ingested. Kept until an operator acts.
        CREATE TABLE IF NOT EXISTS dead_letters (
            id              TEXT PRIMARY KEY NOT NULL,
            event_id        TEXT,
            raw_payload     TEXT NOT NULL,
            reason_code     TEXT NOT NULL,
            detail          TEXT NOT NULL DEFAULT '',
            attempts        INTEGER NOT NULL DEFAULT 0,
            failed_at       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dead_letters_failed_at
            ON dead_letters (failed_at DESC);

        -- Persistence behind the vector store. Never deleted.
        CREATE TABLE IF NOT EXISTS stored_decisions (
            event_id        TEXT PRIMARY KEY NOT NULL,
            event_type      TEXT NOT NULL
                            CHECK (event_type IN ('triage-verdict', 'selection-override',
                                                  'caption-choice', 'publish-action')),
            subject_ref     TEXT NOT NULL,
            session_ref     TEXT NOT NULL DEFAULT '',
            context_text    TEXT NOT NULL,
            payload         TEXT NOT NULL,
            occurred_at     INTEGER NOT NULL,
            embedding       BLOB NOT NULL,
            stored_at       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stored_decisions_occurred
            ON stored_decisions (occurred_at DESC);

        CREATE INDEX IF NOT EXISTS idx_stored_decisions_type
            ON stored_decisions (event_type, occurred_at DESC);

        -- Latest successfully built preference profile per scope.
        CREATE TABLE IF NOT EXISTS profile_cache (
            scope           TEXT PRIMARY KEY NOT NULL,
            profile_version INTEGER NOT NULL,
            built_at        INTEGER NOT NULL,
            body            TEXT NOT NULL
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'decision_memory');
        ",
    )
    .map_err(|e| MementoError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

/// Version 2: `stored_decisions.occurred_at` and `stored_at` hold unix
/// nanoseconds, so rebuilt indexes keep sub-millisecond recency order.
fn apply_v2(conn: &Connection) -> Result<(), MementoError> {
    conn.execute_batch(
        "
        UPDATE stored_decisions
           SET occurred_at = occurred_at * 1000000,
               stored_at   = stored_at * 1000000;

        INSERT INTO schema_migrations (version, name) VALUES (2, 'decision_timestamps_nanos');
        ",
    )
    .map_err(|e| MementoError::Storage(format!("Migration v2 failed: {}", e)))?;

    Ok(())
}
