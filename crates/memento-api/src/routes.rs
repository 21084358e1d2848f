//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, a body limit, and all
//! endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use memento_core::error::MementoError;

use crate::handlers;
use crate::metrics;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Local dashboards only: the configured port and port+1 for a dev server.
    let port = state.config.api.port;
    let origins: Vec<HeaderValue> = [port, port.saturating_add(1)]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let body_limit = state.config.api.body_limit_bytes;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/events", post(handlers::post_event))
        .route("/activity", post(handlers::post_activity))
        .route("/retrieve", post(handlers::retrieve))
        .route("/profile", get(handlers::get_profile))
        .route("/profile/rebuild", post(handlers::rebuild_profile))
        .route("/dead-letters", get(handlers::list_dead_letters))
        .route(
            "/dead-letters/{id}",
            axum::routing::delete(handlers::discard_dead_letter),
        )
        .route(
            "/dead-letters/{id}/requeue",
            post(handlers::requeue_dead_letter),
        )
        .route("/stream", get(handlers::stream))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the configured address until `shutdown` flips to true.
pub async fn start_server(
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), MementoError> {
    let addr = format!("{}:{}", state.config.api.host, state.config.api.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MementoError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| MementoError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
