//! Prometheus recorder and the `/metrics` scrape endpoint.
//!
//! The ingest and retrieval paths record through the `metrics` facade; this
//! module installs the process-wide recorder those calls land in.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

use memento_core::error::MementoError;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Later calls return the same handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, MementoError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            MementoError::Config(format!("failed to install Prometheus recorder: {}", e))
        })?;
        info!("Prometheus metrics initialized");
        Ok(handle)
    })
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render every recorded metric in Prometheus text format.
pub fn render_metrics() -> Option<String> {
    prometheus_handle().map(|h| h.render())
}

/// GET /metrics
pub async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
