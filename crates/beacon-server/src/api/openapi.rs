//! OpenAPI specification generation for the beacon API.
//!
//! The document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for client generation.

use axum::Json;
use utoipa::OpenApi;

use super::background::{
    BackgroundStatusResponse, RegisterResponse, RegistrationView, TaskResultResponse,
    UnregisterResponse,
};
use super::capabilities::CapabilitiesResponse;
use super::error::ErrorResponse;
use super::events::{EventEntry, EventsResponse};
use super::health::{HealthResponse, HealthStatus, RadioHealth};
use super::publisher::PublisherStatusResponse;
use super::watcher::{SectionView, SignalFilterView, SourceView, StopView, WatcherStatusResponse};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the beacon API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for beacon.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beacon API",
        version = "0.1.0",
        description = r"
# beacon API

beacon watches and publishes Bluetooth Low Energy advertisements.

## Overview

1. **Watcher**: Scans for advertisements matching a configured pattern and
   reports per-source proximity (in range / out of range) with hysteresis.
2. **Publisher**: Broadcasts a configured payload in legacy or extended format.
3. **Background**: Registers the watcher or publisher as a background trigger.
   Each trigger cycle stores a summary under its task name; the latest value
   can be read back at any time, even after a restart.
4. **Events**: Recent watcher, publisher and background completion notifications.

## Lifecycle

Engines start in `created`. Starting a started engine is a conflict (409).
Stopping is always allowed and idempotent. Shutdown suspends both engines.
",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beacon server")
    ),
    tags(
        (name = "system", description = "Health checks and adapter capabilities"),
        (name = "watcher", description = "Foreground advertisement watcher"),
        (name = "publisher", description = "Foreground advertisement publisher"),
        (name = "background", description = "Background triggers and their stored results"),
        (name = "events", description = "Recent notifications")
    ),
    paths(
        // System endpoints
        super::health::health_check,
        super::capabilities::get_capabilities,
        // Watcher endpoints
        super::watcher::get_watcher,
        super::watcher::start_watcher,
        super::watcher::stop_watcher,
        // Publisher endpoints
        super::publisher::get_publisher,
        super::publisher::start_publisher,
        super::publisher::stop_publisher,
        // Background endpoints
        super::background::get_background,
        super::background::register_watcher,
        super::background::unregister_watcher,
        super::background::register_publisher,
        super::background::unregister_publisher,
        super::background::get_result,
        // Event endpoints
        super::events::get_events,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // System types
            HealthResponse,
            HealthStatus,
            RadioHealth,
            CapabilitiesResponse,
            // Watcher types
            SectionView,
            SignalFilterView,
            StopView,
            SourceView,
            WatcherStatusResponse,
            // Publisher types
            PublisherStatusResponse,
            // Background types
            RegistrationView,
            BackgroundStatusResponse,
            RegisterResponse,
            UnregisterResponse,
            TaskResultResponse,
            // Event types
            EventEntry,
            EventsResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "beacon API");
        assert!(spec.paths.paths.contains_key("/api/watcher/start"));
        assert!(spec
            .paths
            .paths
            .contains_key("/api/background/results/{task_name}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"beacon API\""));
    }
}
