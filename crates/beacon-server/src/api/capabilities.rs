//! Adapter capability API endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beacon_core::{AdapterCapabilities, CapabilityProbe};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the capabilities router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_capabilities))
}

/// Optional LE features of the local adapter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "extended_features": true,
    "coded_phy": true,
    "uncoded_2m_phy": true,
    "hardware_filter_offload": false,
    "publisher_phys": true
}))]
pub struct CapabilitiesResponse {
    /// Bluetooth 5 extended advertising is available.
    pub extended_features: bool,

    /// LE Coded PHY scanning and advertising is available.
    pub coded_phy: bool,

    /// LE 2M PHY advertising is available.
    pub uncoded_2m_phy: bool,

    /// Pattern filtering can be offloaded to the controller.
    pub hardware_filter_offload: bool,

    /// Publishers may select non-1M PHYs.
    pub publisher_phys: bool,
}

impl From<AdapterCapabilities> for CapabilitiesResponse {
    fn from(caps: AdapterCapabilities) -> Self {
        Self {
            extended_features: caps.extended_features,
            coded_phy: caps.supports_coded_phy(),
            uncoded_2m_phy: caps.supports_2m_phy(),
            hardware_filter_offload: caps.supports_hardware_filter(),
            publisher_phys: caps.supports_publisher_phys(),
        }
    }
}

/// Probe the adapter.
#[utoipa::path(
    get,
    path = "/api/capabilities",
    tag = "system",
    operation_id = "getCapabilities",
    summary = "Get adapter capabilities",
    description = "Queries the radio for optional features. Options the adapter \
        lacks are silently dropped from watcher and publisher configurations.",
    responses(
        (status = 200, description = "Capabilities", body = CapabilitiesResponse),
        (status = 503, description = "Radio unavailable", body = ErrorResponse)
    )
)]
pub async fn get_capabilities(
    State(state): State<SharedState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    let caps = state.radio().capabilities().await?;
    Ok(Json(CapabilitiesResponse::from(caps)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_require_extended_features() {
        let caps = AdapterCapabilities {
            extended_features: false,
            coded_phy: true,
            uncoded_2m_phy: true,
            hardware_filter_offload: true,
        };
        let response = CapabilitiesResponse::from(caps);
        assert!(!response.coded_phy);
        assert!(!response.publisher_phys);

        let response = CapabilitiesResponse::from(AdapterCapabilities::all());
        assert!(response.publisher_phys);
    }
}
