//! Foreground watcher API endpoints.
//!
//! The server owns a single watcher built from the `[watcher]` config
//! section. Its proximity events and received advertisements show up in
//! `GET /api/events`.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{AdvertisementSection, SectionKind, SignalStrengthFilter, StopReason};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the watcher router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_watcher))
        .route("/start", post(start_watcher))
        .route("/stop", post(stop_watcher))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// One advertisement section.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "kind": "manufacturer",
    "id": 65534,
    "data": "3412",
    "display": "0xFFFE: 3412"
}))]
pub struct SectionView {
    /// `manufacturer`, `service_data` or `data_type_0xNN`.
    #[schema(example = "manufacturer")]
    pub kind: String,

    /// Company id or 16-bit service UUID; 0 for raw data types.
    #[schema(example = 65534)]
    pub id: u16,

    /// Payload bytes as lowercase hex.
    #[schema(example = "3412")]
    pub data: String,

    /// Human-readable rendering.
    #[schema(example = "0xFFFE: 3412")]
    pub display: String,
}

impl From<&AdvertisementSection> for SectionView {
    fn from(section: &AdvertisementSection) -> Self {
        let kind = match section.kind {
            SectionKind::Manufacturer => "manufacturer".to_string(),
            SectionKind::ServiceData => "service_data".to_string(),
            SectionKind::DataType(ad_type) => format!("data_type_0x{ad_type:02X}"),
        };
        Self {
            kind,
            id: section.id,
            data: hex::encode(&section.data),
            display: section.to_string(),
        }
    }
}

/// Proximity thresholds and timing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignalFilterView {
    /// In-range threshold in dBm.
    #[schema(example = -70)]
    pub in_range_dbm: i16,

    /// Out-of-range threshold in dBm.
    #[schema(example = -75)]
    pub out_of_range_dbm: i16,

    /// Out-of-range timeout; null means never demoted.
    #[schema(example = 2000, nullable)]
    pub out_of_range_timeout_ms: Option<u64>,

    /// Minimum spacing of proximity events; 0 is unthrottled.
    #[schema(example = 0)]
    pub sampling_interval_ms: u64,
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<&SignalStrengthFilter> for SignalFilterView {
    fn from(filter: &SignalStrengthFilter) -> Self {
        Self {
            in_range_dbm: filter.in_range_dbm(),
            out_of_range_dbm: filter.out_of_range_dbm(),
            out_of_range_timeout_ms: filter.out_of_range_timeout().map(millis),
            sampling_interval_ms: millis(filter.sampling_interval()),
        }
    }
}

/// Why and how the watcher last stopped.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopView {
    /// `UserRequested`, `RadioUnavailable`, `SystemAborted` or `Suspended`.
    #[schema(example = "SystemAborted")]
    pub reason: String,

    /// Transport error enumerant; null for a requested stop.
    #[schema(example = "RadioNotAvailable", nullable)]
    pub error: Option<String>,
}

/// Proximity of one advertising source.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SourceView {
    /// Source address.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: String,

    /// `Unknown`, `InRange` or `OutOfRange`.
    #[schema(example = "InRange")]
    pub proximity: String,
}

/// Foreground watcher status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": "started",
    "pattern": [{"kind": "manufacturer", "id": 65534, "data": "3412", "display": "0xFFFE: 3412"}],
    "filter": {"in_range_dbm": -70, "out_of_range_dbm": -75, "out_of_range_timeout_ms": 2000, "sampling_interval_ms": 0},
    "allow_extended_advertisements": false,
    "scan_coded_phy": false,
    "hardware_filter_offload": false,
    "last_stop": null,
    "sources": [{"address": "AA:BB:CC:DD:EE:FF", "proximity": "InRange"}]
}))]
pub struct WatcherStatusResponse {
    /// `created`, `started` or `stopped`.
    #[schema(example = "started")]
    pub state: String,

    /// Sections a sample must contain; empty matches everything.
    pub pattern: Vec<SectionView>,

    /// Proximity filter settings.
    pub filter: SignalFilterView,

    /// Whether extended advertisements are received.
    pub allow_extended_advertisements: bool,

    /// Whether the Coded PHY is scanned.
    pub scan_coded_phy: bool,

    /// Whether the pattern is offloaded to the controller.
    pub hardware_filter_offload: bool,

    /// Last stop, if the watcher has stopped since the server started.
    #[schema(nullable)]
    pub last_stop: Option<StopView>,

    /// Sources seen since the last start.
    pub sources: Vec<SourceView>,
}

fn watcher_status(state: &SharedState) -> WatcherStatusResponse {
    let watcher = state.watcher();
    let config = watcher.config();
    WatcherStatusResponse {
        state: watcher.state().to_string(),
        pattern: config.pattern.sections().iter().map(SectionView::from).collect(),
        filter: SignalFilterView::from(&config.signal),
        allow_extended_advertisements: config.allow_extended_advertisements,
        scan_coded_phy: config.scan_coded_phy,
        hardware_filter_offload: config.hardware_filter_offload,
        last_stop: watcher.last_stop().map(|(reason, error)| StopView {
            reason: reason.to_string(),
            error: error.map(|e| e.to_string()),
        }),
        sources: watcher
            .sources()
            .into_iter()
            .map(|(address, proximity)| SourceView {
                address: address.to_string(),
                proximity: proximity.to_string(),
            })
            .collect(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the foreground watcher status.
#[utoipa::path(
    get,
    path = "/api/watcher",
    tag = "watcher",
    operation_id = "getWatcher",
    summary = "Get watcher status",
    description = "Returns the lifecycle state, configuration and per-source \
        proximity of the foreground advertisement watcher.",
    responses(
        (status = 200, description = "Watcher status", body = WatcherStatusResponse)
    )
)]
pub async fn get_watcher(State(state): State<SharedState>) -> Json<WatcherStatusResponse> {
    Json(watcher_status(&state))
}

/// Start the foreground watcher.
#[utoipa::path(
    post,
    path = "/api/watcher/start",
    tag = "watcher",
    operation_id = "startWatcher",
    summary = "Start watching",
    description = "Starts scanning. Matching advertisements and proximity \
        changes are reported as events. A stopped watcher can be started again.",
    responses(
        (status = 200, description = "Watcher started", body = WatcherStatusResponse),
        (status = 409, description = "Already started", body = ErrorResponse),
        (status = 503, description = "Radio unavailable", body = ErrorResponse)
    )
)]
pub async fn start_watcher(
    State(state): State<SharedState>,
) -> ApiResult<Json<WatcherStatusResponse>> {
    state.watcher().start().await?;
    Ok(Json(watcher_status(&state)))
}

/// Stop the foreground watcher.
#[utoipa::path(
    post,
    path = "/api/watcher/stop",
    tag = "watcher",
    operation_id = "stopWatcher",
    summary = "Stop watching",
    description = "Stops scanning. Stopping an already stopped watcher does nothing.",
    responses(
        (status = 200, description = "Watcher stopped", body = WatcherStatusResponse)
    )
)]
pub async fn stop_watcher(State(state): State<SharedState>) -> Json<WatcherStatusResponse> {
    state.watcher().stop(StopReason::UserRequested);
    Json(watcher_status(&state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_view_from_manufacturer_section() {
        let view = SectionView::from(&AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12]));
        assert_eq!(view.kind, "manufacturer");
        assert_eq!(view.id, 0xFFFE);
        assert_eq!(view.data, "3412");
        assert_eq!(view.display, "0xFFFE: 3412");
    }

    #[test]
    fn test_section_view_matches_serialized_section() {
        let section = AdvertisementSection {
            kind: SectionKind::DataType(0xFF),
            id: 0,
            data: vec![0xAB, 0x0F, 0x00],
        };
        let view = SectionView::from(&section);
        assert_eq!(view.kind, "data_type_0xFF");
        assert_eq!(view.data, "ab0f00");

        let serialized = serde_json::to_value(&section).unwrap();
        assert_eq!(serialized["data"], view.data);
    }

    #[test]
    fn test_signal_filter_view_infinite_timeout() {
        let filter =
            SignalStrengthFilter::new(-60, -80, None, std::time::Duration::from_millis(500))
                .unwrap();
        let view = SignalFilterView::from(&filter);
        assert_eq!(view.out_of_range_timeout_ms, None);
        assert_eq!(view.sampling_interval_ms, 500);
    }
}
