//! Memento Storage crate - SQLite persistence for the decision memory.
//!
//! Provides a WAL-mode SQLite database with migrations, the durable event
//! queue, the dead-letter sink, stored-decision persistence behind the vector
//! store, and the fallback preference-profile cache.

pub mod db;
pub mod dead_letter;
pub mod decisions;
pub mod migrations;
pub mod profile_cache;
pub mod queue;

pub use db::Database;
pub use dead_letter::{DeadLetterEntry, DeadLetterSink};
pub use decisions::DecisionRepository;
pub use profile_cache::{ProfileCache, ProfileLookup, ProfileReader, SqliteProfileCache};
pub use queue::{EventQueue, QueuedMessage};
