//! Health check API endpoint.
//!
//! Healthy means the radio answers a capability query and the foreground
//! watcher has not been aborted by its transport. A degraded service still
//! serves every endpoint, but `/health` answers 503 so supervisors notice.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use beacon_core::{CapabilityProbe, StopReason, WatcherState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Overall service condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Radio reachable, nothing aborted.
    Ok,
    /// Radio unreachable or the watcher was aborted underneath.
    Degraded,
}

impl HealthStatus {
    const fn assess(radio: &RadioHealth, watcher_aborted: bool) -> Self {
        if radio.available && !watcher_aborted {
            Self::Ok
        } else {
            Self::Degraded
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::Degraded => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Result of probing the radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RadioHealth {
    /// The capability query succeeded.
    pub available: bool,

    /// Why the query failed, if it did.
    #[schema(example = "Device unavailable: radio is off")]
    pub error: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "radio": {"available": true, "error": null},
    "watcher": "started",
    "watcher_aborted": false,
    "publisher": "created",
    "background_registrations": 1
}))]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: HealthStatus,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Radio reachability, queried per request.
    pub radio: RadioHealth,

    /// Foreground watcher state.
    #[schema(example = "started")]
    pub watcher: String,

    /// The watcher is stopped because its transport aborted.
    pub watcher_aborted: bool,

    /// Foreground publisher state.
    #[schema(example = "created")]
    pub publisher: String,

    /// Number of active background registrations.
    #[schema(example = 1)]
    pub background_registrations: usize,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Query the radio and report engine states.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Queries the radio and reports the lifecycle state of each \
        engine. Answers 503 with the same body when the radio is unreachable \
        or the foreground watcher was aborted by its transport.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is degraded", body = HealthResponse)
    )
)]
pub async fn health_check(
    State(state): State<SharedState>,
) -> (StatusCode, Json<HealthResponse>) {
    let radio = match state.radio().capabilities().await {
        Ok(_) => RadioHealth {
            available: true,
            error: None,
        },
        Err(e) => RadioHealth {
            available: false,
            error: Some(e.to_string()),
        },
    };
    let watcher_state = state.watcher().state();
    let watcher_aborted = watcher_state == WatcherState::Stopped
        && matches!(
            state.watcher().last_stop(),
            Some((StopReason::SystemAborted, _))
        );
    let status = HealthStatus::assess(&radio, watcher_aborted);

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        radio,
        watcher: watcher_state.to_string(),
        watcher_aborted,
        publisher: state.publisher().state().to_string(),
        background_registrations: state.scheduler().registrations().len(),
    };
    (status.http_status(), Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio(available: bool) -> RadioHealth {
        RadioHealth {
            available,
            error: (!available).then(|| "radio is off".to_string()),
        }
    }

    #[test]
    fn test_assess() {
        assert_eq!(HealthStatus::assess(&radio(true), false), HealthStatus::Ok);
        assert_eq!(HealthStatus::assess(&radio(false), false), HealthStatus::Degraded);
        assert_eq!(HealthStatus::assess(&radio(true), true), HealthStatus::Degraded);
        assert_eq!(HealthStatus::Degraded.http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(HealthStatus::Degraded).unwrap(), "degraded");
    }
}
