//! Prometheus instruments for the write path.
//!
//! These only record; installing a recorder and rendering the scrape output
//! is the server's job. Without a recorder every call is a no-op.

use metrics::{counter, gauge};

pub const DECISIONS_TOTAL: &str = "memento_ingest_decisions_total";
pub const RETRIES_TOTAL: &str = "memento_ingest_retries_total";
pub const DEAD_LETTERS_TOTAL: &str = "memento_ingest_dead_letters_total";
pub const PUBLISHED_TOTAL: &str = "memento_events_published_total";
pub const QUEUE_DEPTH: &str = "memento_queue_depth";

/// A new decision reached the vector store.
pub fn decision_stored() {
    counter!(DECISIONS_TOTAL, "outcome" => "stored").increment(1);
}

/// A redelivery of a decision that was already stored.
pub fn decision_duplicate() {
    counter!(DECISIONS_TOTAL, "outcome" => "duplicate").increment(1);
}

pub fn retry_scheduled(reason: &'static str) {
    counter!(RETRIES_TOTAL, "reason" => reason).increment(1);
}

pub fn dead_lettered(reason: &'static str) {
    counter!(DEAD_LETTERS_TOTAL, "reason" => reason).increment(1);
}

/// Producer-side enqueue result. Failures are otherwise invisible to callers.
pub fn event_published(ok: bool) {
    let status = if ok { "ok" } else { "failed" };
    counter!(PUBLISHED_TOTAL, "status" => status).increment(1);
}

pub fn queue_depth(depth: u64) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}
