// Event bus HTTP routes (producer, read acknowledgment, SSE streaming)
//
// The streaming handler drains one connection's queue and emits one frame
// per event, or a heartbeat frame after the idle timeout. The connection is
// unregistered on every exit path through a guard dropped with the stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use beacon_core::{BusError, DeliveryQueue, Event, EventManager, EventPriority, Recv};

use crate::auth::AuthUser;

/// App state for event routes
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<EventManager>,
}

/// Create event routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/events", post(create_event))
        .route("/v1/events/read", post(mark_read_batch))
        .route("/v1/events/:id/read", post(mark_read))
        .route("/v1/streams/:event_type", get(stream_events))
        .with_state(state)
}

// ============================================
// Request / Response types
// ============================================

/// Request to create an event
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEventRequest {
    /// Registered event type name
    #[schema(example = "notification")]
    pub event_type: String,
    /// Recipient user id
    pub target_user_id: i64,
    /// Delivery priority; defaults to normal
    #[serde(default)]
    pub priority: EventPriority,
    /// Minutes until the event expires; omit for no expiry
    pub expire_after_minutes: Option<i64>,
    /// Payload matching the registered shape for event_type
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// Result of a single read acknowledgment
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    /// "read" on the first acknowledgment, "already_read" after
    #[schema(example = "read")]
    pub status: String,
}

/// Request to mark a batch of events read
#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkReadBatchRequest {
    pub event_ids: Vec<Uuid>,
}

/// Result of a batch read acknowledgment
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadBatchResponse {
    /// Rows actually updated; ids not owned by the caller are skipped
    pub updated: u64,
}

fn error_response(error: BusError) -> (StatusCode, String) {
    let status = match &error {
        BusError::UnknownEventType(_) | BusError::Payload { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => {
            tracing::error!(%error, "event operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, error.to_string())
}

// ============================================
// HTTP Handlers
// ============================================

/// POST /v1/events - Create an event
///
/// The event is durably stored before any delivery; a 201 means "stored",
/// not "delivered".
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = CreateEventRequest,
    responses(
        (status = 201, description = "Event stored", body = Event),
        (status = 422, description = "Unknown event type or invalid payload"),
        (status = 500, description = "Store failure")
    ),
    tag = "events"
)]
pub async fn create_event(
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let expire_after = request.expire_after_minutes.map(chrono::Duration::minutes);
    let event = state
        .manager
        .create_event(
            &request.event_type,
            request.target_user_id,
            request.priority,
            expire_after,
            request.payload,
        )
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(event)))
}

/// POST /v1/events/{id}/read - Mark one event read
///
/// Idempotent: re-acknowledging returns "already_read", not an error.
#[utoipa::path(
    post,
    path = "/v1/events/{id}/read",
    params(("id" = Uuid, Path, description = "Event ID")),
    responses(
        (status = 200, description = "Acknowledgment result", body = MarkReadResponse),
        (status = 401, description = "Missing identity"),
        (status = 500, description = "Store failure")
    ),
    tag = "events"
)]
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, (StatusCode, String)> {
    let updated = state
        .manager
        .mark_read(id, user_id)
        .await
        .map_err(error_response)?;

    let status = if updated { "read" } else { "already_read" };
    Ok(Json(MarkReadResponse {
        status: status.to_string(),
    }))
}

/// POST /v1/events/read - Mark a batch of events read
///
/// Ids not owned by the caller are skipped silently.
#[utoipa::path(
    post,
    path = "/v1/events/read",
    request_body = MarkReadBatchRequest,
    responses(
        (status = 200, description = "Batch result", body = MarkReadBatchResponse),
        (status = 401, description = "Missing identity"),
        (status = 500, description = "Store failure")
    ),
    tag = "events"
)]
pub async fn mark_read_batch(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<MarkReadBatchRequest>,
) -> Result<Json<MarkReadBatchResponse>, (StatusCode, String)> {
    let updated = state
        .manager
        .mark_read_batch(&request.event_ids, user_id)
        .await
        .map_err(error_response)?;

    Ok(Json(MarkReadBatchResponse { updated }))
}

/// GET /v1/streams/{event_type} - Open an SSE stream
///
/// Registers a connection for the caller (evicting their oldest one at the
/// per-user cap), replays recoverable stored events, then emits live
/// events as frames. A heartbeat frame is sent after each idle timeout.
#[utoipa::path(
    get,
    path = "/v1/streams/{event_type}",
    params(("event_type" = String, Path, description = "Subscribed event type")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 401, description = "Missing identity"),
        (status = 404, description = "Unknown event type")
    ),
    tag = "events"
)]
pub async fn stream_events(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(event_type): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, String)> {
    if !state.manager.registry().contains(&event_type) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("unknown event type: {event_type}"),
        ));
    }

    let registration = state
        .manager
        .register_stream(user_id, &event_type)
        .await
        .map_err(error_response)?;
    tracing::info!(user_id, stream_id = %registration.stream_id, %event_type, "stream opened");

    let stream_state = StreamState {
        queue: registration.queue.clone(),
        heartbeat: state.manager.config().heartbeat_interval,
        _guard: StreamGuard {
            manager: state.manager.clone(),
            user_id,
            stream_id: registration.stream_id,
        },
    };

    let stream = stream::unfold(stream_state, |state| async move {
        match state.queue.recv_timeout(state.heartbeat).await {
            Recv::Event(event) => match event_frame(&event) {
                Ok(frame) => Some((Ok(frame), state)),
                Err(error) => {
                    // Isolated to this connection; the guard unregisters it
                    let error = BusError::stream(error.to_string());
                    tracing::error!(%error, event_id = %event.id, "closing stream");
                    None
                }
            },
            Recv::Timeout => Some((Ok(heartbeat_frame()), state)),
            Recv::Closed => None,
        }
    });

    Ok(Sse::new(stream))
}

// ============================================
// Stream plumbing
// ============================================

struct StreamState {
    queue: Arc<DeliveryQueue>,
    heartbeat: Duration,
    /// Held for its Drop impl
    _guard: StreamGuard,
}

/// Unregisters the connection when the stream is dropped — normal
/// completion, eviction, client disconnect, and encode failure all pass
/// through here exactly once.
struct StreamGuard {
    manager: Arc<EventManager>,
    user_id: i64,
    stream_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.manager.unregister_stream(self.user_id, self.stream_id);
        tracing::debug!(user_id = self.user_id, stream_id = %self.stream_id, "stream closed");
    }
}

/// One wire frame per event: `event: <type>` + `data: <json payload>`
fn event_frame(event: &Event) -> Result<SseEvent, serde_json::Error> {
    Ok(SseEvent::default()
        .event(&event.event_type)
        .data(serde_json::to_string(&event.payload)?))
}

fn heartbeat_frame() -> SseEvent {
    SseEvent::default()
        .event("heartbeat")
        .data(r#"{"status":"heartbeat"}"#)
}
