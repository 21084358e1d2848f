//! Memento Ingest crate - the asynchronous write path.
//!
//! Producers hand decision events to [`DecisionPublisher`], which enqueues
//! them without ever failing the caller. [`IngestionWorker`] drains the queue
//! in the background, embeds each event and upserts it into the vector
//! store, retrying transient failures and dead-lettering the rest.

pub mod metrics;
pub mod publisher;
pub mod retry;
pub mod worker;

pub use publisher::DecisionPublisher;
pub use retry::{ErrorCategory, RetryPolicy};
pub use worker::{IngestOutcome, IngestionWorker};
