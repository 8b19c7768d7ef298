//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `watcher` - Foreground advertisement watcher lifecycle
//! - `publisher` - Foreground advertisement publisher lifecycle
//! - `background` - Background trigger registration and stored results
//! - `events` - Recent notifications
//! - `capabilities` - Adapter feature probing
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::state::SharedState;

pub mod background;
pub mod capabilities;
pub mod error;
pub mod events;
pub mod health;
pub mod openapi;
pub mod publisher;
pub mod watcher;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                          - Health check
/// /api
/// ├── /watcher                     - Status, /start, /stop
/// ├── /publisher                   - Status, /start, /stop
/// ├── /background                  - Status
/// │   ├── /watcher                 - POST register, DELETE unregister
/// │   ├── /publisher               - POST register, DELETE unregister
/// │   └── /results/{task_name}     - Latest stored result
/// ├── /events                      - Recent notifications
/// ├── /capabilities                - Adapter features
/// └── /openapi.json                - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                // OpenAPI spec at /api/openapi.json
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/watcher", watcher::router())
                .nest("/publisher", publisher::router())
                .nest("/background", background::router())
                .nest("/events", events::router())
                .nest("/capabilities", capabilities::router()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}
