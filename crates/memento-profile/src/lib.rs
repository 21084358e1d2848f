//! Memento Profile crate - offline preference profile building.
//!
//! Provides:
//! - Deterministic rule-based statistics over decision history
//! - An optional narrative summary behind a pluggable generator
//! - A single-flight builder that atomically replaces the cached profile
//! - A scheduler that rebuilds on a fixed interval

pub mod builder;
pub mod error;
pub mod narrator;
pub mod scheduler;
pub mod stats;

pub use builder::{BuildOutcome, ProfileBuilder, SkipReason};
pub use error::ProfileError;
pub use narrator::{NarrativeGenerator, TemplateNarrator};
pub use scheduler::ProfileScheduler;
pub use stats::StatsAggregator;
