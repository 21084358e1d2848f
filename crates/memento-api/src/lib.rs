//! Memento API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Exposes decision ingress, retrieval, the preference profile, dead-letter
//! administration, Prometheus metrics and a live event stream over local
//! HTTP.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use metrics::init_metrics;
pub use routes::{create_router, start_server};
pub use state::AppState;
