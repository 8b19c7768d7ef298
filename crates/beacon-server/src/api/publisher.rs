//! Foreground publisher API endpoints.
//!
//! The server owns a single publisher built from the `[publisher]` config
//! section. Status changes reported by the radio show up in `GET /api/events`.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::Phy;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::api::watcher::SectionView;
use crate::state::SharedState;

/// Creates the publisher router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_publisher))
        .route("/start", post(start_publisher))
        .route("/stop", post(stop_publisher))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Foreground publisher status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": "started",
    "observed_status": "Started",
    "last_error": null,
    "payload": [{"kind": "manufacturer", "id": 65534, "data": "3412", "display": "0xFFFE: 3412"}],
    "payload_bytes": 6,
    "payload_limit": 31,
    "primary_phy": "1M",
    "secondary_phy": "1M",
    "use_extended_format": false
}))]
pub struct PublisherStatusResponse {
    /// `created`, `started` or `stopped`.
    #[schema(example = "started")]
    pub state: String,

    /// Last status reported by the radio (`Waiting`, `Started`, `Stopped`, `Aborted`).
    #[schema(example = "Started", nullable)]
    pub observed_status: Option<String>,

    /// Error enumerant reported with the last status; null for success.
    #[schema(example = "RadioNotAvailable", nullable)]
    pub last_error: Option<String>,

    /// Sections being broadcast.
    pub payload: Vec<SectionView>,

    /// Encoded payload size in bytes.
    #[schema(example = 6)]
    pub payload_bytes: usize,

    /// Largest payload the selected format allows.
    #[schema(example = 31)]
    pub payload_limit: usize,

    /// Primary advertising PHY.
    #[schema(example = "1M")]
    pub primary_phy: String,

    /// Secondary advertising PHY.
    #[schema(example = "1M")]
    pub secondary_phy: String,

    /// Whether the extended advertising format is used.
    pub use_extended_format: bool,
}

const fn phy_name(phy: Phy) -> &'static str {
    match phy {
        Phy::Uncoded1M => "1M",
        Phy::Uncoded2M => "2M",
        Phy::Coded => "Coded",
    }
}

fn publisher_status(state: &SharedState) -> PublisherStatusResponse {
    let publisher = state.publisher();
    let config = publisher.config();
    let snapshot = publisher.snapshot();
    PublisherStatusResponse {
        state: snapshot.state.to_string(),
        observed_status: snapshot.observed.map(|s| s.to_string()),
        last_error: snapshot.last_error.map(|e| e.to_string()),
        payload: config.payload.iter().map(SectionView::from).collect(),
        payload_bytes: config.encoded_len(),
        payload_limit: config.payload_limit(),
        primary_phy: phy_name(config.primary_phy).to_string(),
        secondary_phy: phy_name(config.secondary_phy).to_string(),
        use_extended_format: config.use_extended_format,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the foreground publisher status.
#[utoipa::path(
    get,
    path = "/api/publisher",
    tag = "publisher",
    operation_id = "getPublisher",
    summary = "Get publisher status",
    description = "Returns the lifecycle state, the last radio-reported status \
        and the configured payload of the foreground publisher.",
    responses(
        (status = 200, description = "Publisher status", body = PublisherStatusResponse)
    )
)]
pub async fn get_publisher(State(state): State<SharedState>) -> Json<PublisherStatusResponse> {
    Json(publisher_status(&state))
}

/// Start the foreground publisher.
#[utoipa::path(
    post,
    path = "/api/publisher/start",
    tag = "publisher",
    operation_id = "startPublisher",
    summary = "Start broadcasting",
    description = "Requests the payload to be broadcast. The radio may report \
        Waiting before Started when it is busy. A stopped publisher can be started again.",
    responses(
        (status = 200, description = "Broadcast requested", body = PublisherStatusResponse),
        (status = 409, description = "Already started", body = ErrorResponse),
        (status = 422, description = "Payload does not fit the selected format", body = ErrorResponse),
        (status = 503, description = "Radio unavailable", body = ErrorResponse)
    )
)]
pub async fn start_publisher(
    State(state): State<SharedState>,
) -> ApiResult<Json<PublisherStatusResponse>> {
    state.publisher().start().await?;
    Ok(Json(publisher_status(&state)))
}

/// Stop the foreground publisher.
#[utoipa::path(
    post,
    path = "/api/publisher/stop",
    tag = "publisher",
    operation_id = "stopPublisher",
    summary = "Stop broadcasting",
    description = "Requests the broadcast to end. Stopping twice is harmless.",
    responses(
        (status = 200, description = "Stop requested", body = PublisherStatusResponse)
    )
)]
pub async fn stop_publisher(State(state): State<SharedState>) -> Json<PublisherStatusResponse> {
    state.publisher().stop();
    Json(publisher_status(&state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phy_names() {
        assert_eq!(phy_name(Phy::Uncoded1M), "1M");
        assert_eq!(phy_name(Phy::Uncoded2M), "2M");
        assert_eq!(phy_name(Phy::Coded), "Coded");
    }
}
