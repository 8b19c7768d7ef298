//! Recent notification API endpoint.
//!
//! Engines and completion monitors deliver notifications into a bounded
//! ring; this endpoint reads the tail of it.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::state::{RecordedEvent, SharedState};

/// Default number of events returned.
const DEFAULT_LIMIT: usize = 50;

/// Creates the events router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_events))
}

/// Query parameters for the events endpoint.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Maximum number of events to return, newest last. Defaults to 50.
    #[param(example = 20, minimum = 1)]
    pub limit: Option<usize>,
}

/// One delivered notification.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "received_at": "2025-01-15T03:30:00Z",
    "source": "watcher",
    "text": "Watcher stopped or aborted: RadioNotAvailable",
    "payload": {"source": "watcher", "event": "stopped", "reason": "system_aborted", "error": "RadioNotAvailable"}
}))]
pub struct EventEntry {
    /// When the server received it (RFC 3339).
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub received_at: String,

    /// `watcher`, `publisher` or `task_completed`.
    #[schema(example = "watcher")]
    pub source: String,

    /// User-facing text, including any error enumerant.
    #[schema(example = "Watcher stopped or aborted: RadioNotAvailable")]
    pub text: String,

    /// Structured notification.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl From<&RecordedEvent> for EventEntry {
    fn from(event: &RecordedEvent) -> Self {
        let payload = serde_json::to_value(&event.notification).unwrap_or_default();
        let source = payload
            .get("source")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Self {
            received_at: event.received_at.to_rfc3339(),
            source,
            text: event.notification.to_string(),
            payload,
        }
    }
}

/// Recent notifications.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    /// Oldest first.
    pub events: Vec<EventEntry>,

    /// Number of events returned.
    #[schema(example = 1)]
    pub count: usize,
}

/// Get recent notifications.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    operation_id = "getEvents",
    summary = "Get recent events",
    description = "Returns the most recent watcher, publisher and background \
        completion notifications, oldest first. The buffer is bounded by \
        `notifications.history_size`.",
    params(EventsQuery),
    responses(
        (status = 200, description = "Recent events", body = EventsResponse)
    )
)]
pub async fn get_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);
    let events: Vec<EventEntry> = state
        .recent_events(limit)
        .iter()
        .map(EventEntry::from)
        .collect();
    let count = events.len();
    Json(EventsResponse { events, count })
}
