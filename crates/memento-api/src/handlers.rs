//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use memento_core::types::{EventType, PreferenceProfile};
use memento_profile::BuildOutcome;
use memento_storage::{DeadLetterEntry, ProfileLookup};
use memento_vector::{RetrievalOutcome, RetrievalQuery};

use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for `GET /dead-letters`.
const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;
const MAX_DEAD_LETTER_LIMIT: usize = 500;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_state: String,
    pub queue_depth: u64,
    pub dead_letter_count: u64,
    pub decision_count: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// `event_id` from the payload, when it had one.
    pub event_id: Option<String>,
    /// False when the transport refused the event; the producer is still
    /// answered with 202.
    pub queued: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityRequest {
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub store_state: String,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub text: String,
    #[serde(default)]
    pub category: Option<EventType>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub budget_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLettersResponse {
    pub entries: Vec<DeadLetterEntry>,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequeueResponse {
    pub id: String,
    pub message_id: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - store state and backlog summary. Rates live on `/metrics`.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        store_state: state.lifecycle.state().to_string(),
        queue_depth: state.queue.depth()?,
        dead_letter_count: state.dead_letters.count()?,
        decision_count: state.decisions.count()?,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// POST /events - decision event ingress.
///
/// Any JSON body is accepted and queued as-is; invalid events are
/// dead-lettered by the ingestion worker rather than rejected here.
pub async fn post_event(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let value: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("body is not JSON: {}", e)))?;
    let event_id = value
        .get("event_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let queued = state.publisher.publish_raw(&body).is_some();
    debug!(event_id = ?event_id, queued, "Decision event received");

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { event_id, queued })))
}

/// POST /activity - user activity signal; pre-warms a stopped store.
pub async fn post_activity(
    State(state): State<AppState>,
    body: Option<Json<ActivityRequest>>,
) -> (StatusCode, Json<ActivityResponse>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let source = request.source.unwrap_or_else(|| "api".to_string());
    state.lifecycle.signal_user_active(&source);

    (
        StatusCode::ACCEPTED,
        Json(ActivityResponse {
            store_state: state.lifecycle.state().to_string(),
        }),
    )
}

/// POST /retrieve - similar past decisions within a time budget.
///
/// Always 200: an unavailable store is reported in the body.
pub async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Json<RetrievalOutcome> {
    let budget = request
        .budget_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.retrieval.default_budget());
    let query = RetrievalQuery {
        text: request.text,
        category: request.category,
        k: request.k,
    };
    Json(state.retrieval.retrieve(query, budget).await)
}

/// GET /profile - the current preference profile.
pub async fn get_profile(
    State(state): State<AppState>,
) -> Result<Json<PreferenceProfile>, ApiError> {
    let scope = &state.config.profile.scope;
    match state.profiles.read(scope).await? {
        ProfileLookup::Current { profile } => Ok(Json(profile)),
        ProfileLookup::NoProfileYet => Err(ApiError::NoProfileYet(scope.clone())),
    }
}

/// POST /profile/rebuild - run a profile build now.
pub async fn rebuild_profile(
    State(state): State<AppState>,
) -> Result<Json<BuildOutcome>, ApiError> {
    info!("Manual profile rebuild requested");
    state
        .builder
        .run()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// GET /dead-letters - most recent entries first.
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<DeadLettersResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    Ok(Json(DeadLettersResponse {
        entries: state.dead_letters.list(limit)?,
        total: state.dead_letters.count()?,
    }))
}

/// POST /dead-letters/{id}/requeue - put the raw payload back on the queue.
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RequeueResponse>, ApiError> {
    match state.dead_letters.requeue(&id)? {
        Some(message_id) => Ok(Json(RequeueResponse { id, message_id })),
        None => Err(ApiError::NotFound(format!("dead letter {} not found", id))),
    }
}

/// DELETE /dead-letters/{id} - discard an entry.
pub async fn discard_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.dead_letters.discard(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("dead letter {} not found", id)))
    }
}

/// GET /stream - SSE stream of subsystem events.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event_name()).data(data)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
