//! Background trigger API endpoints.
//!
//! Registers the configured watcher and publisher as background triggers
//! and reads back their result slots. While a trigger is registered through
//! this API a completion monitor is attached, so every completed cycle also
//! appears in `GET /api/events`.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use beacon_core::{
    describe_result, BackgroundAccess, BackgroundWatcherConfig, BeaconError,
    RegistrationHandle, TaskResult, TriggerConfig, TriggerKind,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the background router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_background))
        .route(
            "/watcher",
            axum::routing::post(register_watcher).delete(unregister_watcher),
        )
        .route(
            "/publisher",
            axum::routing::post(register_publisher).delete(unregister_publisher),
        )
        .route("/results/{task_name}", get(get_result))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// An active background registration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "5f0c7f57-8a4e-4c43-9c0a-0b9f0d5e8d11",
    "task_name": "AdvertisementWatcherTask",
    "kind": "watcher",
    "registered_at": "2025-01-15T03:30:00Z"
}))]
pub struct RegistrationView {
    /// Unique id of the registration.
    pub id: Uuid,

    /// Task name results are stored under.
    #[schema(example = "AdvertisementWatcherTask")]
    pub task_name: String,

    /// `watcher` or `publisher`.
    #[schema(example = "watcher")]
    pub kind: String,

    /// When it was registered (RFC 3339).
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub registered_at: String,
}

impl From<&RegistrationHandle> for RegistrationView {
    fn from(handle: &RegistrationHandle) -> Self {
        Self {
            id: handle.id,
            task_name: handle.task_name.clone(),
            kind: match handle.kind {
                TriggerKind::Watcher => "watcher",
                TriggerKind::Publisher => "publisher",
            }
            .to_string(),
            registered_at: handle.registered_at.to_rfc3339(),
        }
    }
}

/// Background scheduler status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BackgroundStatusResponse {
    /// `always_allowed`, `allowed_subject_to_system_policy` or `denied`.
    #[schema(example = "always_allowed")]
    pub access: String,

    /// Active registrations.
    pub registrations: Vec<RegistrationView>,

    /// Task names with a stored result.
    pub stored_results: Vec<String>,

    /// Task names whose completions are forwarded to the event log.
    pub monitored_tasks: Vec<String>,
}

/// Response after registering a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    /// The new registration.
    pub registration: RegistrationView,

    /// Background access status at registration time.
    #[schema(example = "always_allowed")]
    pub access: String,

    /// Set when the trigger is registered but may never run.
    #[schema(nullable)]
    pub warning: Option<String>,
}

/// Response after unregistering a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnregisterResponse {
    /// Task name that was unregistered.
    #[schema(example = "AdvertisementWatcherTask")]
    pub task_name: String,

    /// Id of the removed registration.
    pub registration_id: Uuid,
}

/// Latest stored result of a background task.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "task_name": "AdvertisementPublisherTask",
    "summary": "Publisher status: Started",
    "sequence": 3,
    "error": null,
    "recorded_at": "2025-01-15T03:30:00Z",
    "text": "#3 Publisher status: Started (Success)"
}))]
pub struct TaskResultResponse {
    /// Task name.
    #[schema(example = "AdvertisementPublisherTask")]
    pub task_name: String,

    /// Summary written by the last cycle.
    #[schema(example = "Publisher status: Started")]
    pub summary: String,

    /// Increments with every cycle.
    #[schema(example = 3)]
    pub sequence: u64,

    /// Error enumerant the trigger reported; null for success.
    #[schema(nullable)]
    pub error: Option<String>,

    /// When the slot was written (RFC 3339).
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub recorded_at: String,

    /// One-line rendering including the error enumerant.
    #[schema(example = "#3 Publisher status: Started (Success)")]
    pub text: String,
}

impl From<&TaskResult> for TaskResultResponse {
    fn from(result: &TaskResult) -> Self {
        Self {
            task_name: result.task_name.clone(),
            summary: result.summary.clone(),
            sequence: result.sequence,
            error: result.error.map(|e| e.to_string()),
            recorded_at: result.recorded_at.to_rfc3339(),
            text: describe_result(result),
        }
    }
}

const fn access_name(access: BackgroundAccess) -> &'static str {
    match access {
        BackgroundAccess::AlwaysAllowed => "always_allowed",
        BackgroundAccess::AllowedSubjectToSystemPolicy => "allowed_subject_to_system_policy",
        BackgroundAccess::Denied => "denied",
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get background scheduler status.
#[utoipa::path(
    get,
    path = "/api/background",
    tag = "background",
    operation_id = "getBackground",
    summary = "Get background status",
    description = "Returns the background access status, active registrations \
        and the task names that have a stored result.",
    responses(
        (status = 200, description = "Background status", body = BackgroundStatusResponse),
        (status = 500, description = "Result store unreadable", body = ErrorResponse)
    )
)]
pub async fn get_background(
    State(state): State<SharedState>,
) -> ApiResult<Json<BackgroundStatusResponse>> {
    let scheduler = state.scheduler();
    Ok(Json(BackgroundStatusResponse {
        access: access_name(scheduler.access()).to_string(),
        registrations: scheduler
            .registrations()
            .iter()
            .map(RegistrationView::from)
            .collect(),
        stored_results: state.bridge().task_names()?,
        monitored_tasks: state.monitored_tasks(),
    }))
}

/// Register the configured watcher as a background trigger.
#[utoipa::path(
    post,
    path = "/api/background/watcher",
    tag = "background",
    operation_id = "registerBackgroundWatcher",
    summary = "Register background watcher",
    description = "Registers the configured watcher pattern (exactly one section) \
        as a background trigger. Each cycle stores an EventCount summary under \
        the configured watcher task name.",
    responses(
        (status = 200, description = "Registered", body = RegisterResponse),
        (status = 409, description = "Already registered", body = ErrorResponse),
        (status = 422, description = "Configuration unusable in background", body = ErrorResponse),
        (status = 503, description = "Radio unavailable", body = ErrorResponse)
    )
)]
pub async fn register_watcher(State(state): State<SharedState>) -> ApiResult<Json<RegisterResponse>> {
    let configured = state.config.background_watcher_config()?;
    let config = BackgroundWatcherConfig::new(
        configured
            .watcher_config()
            .clone()
            .constrained_to(&state.capabilities),
    )?;
    let task_name = state.config.background.watcher_task.clone();
    register(&state, TriggerConfig::Watcher(config), &task_name).await
}

/// Register the configured publisher as a background trigger.
#[utoipa::path(
    post,
    path = "/api/background/publisher",
    tag = "background",
    operation_id = "registerBackgroundPublisher",
    summary = "Register background publisher",
    description = "Registers the configured payload as a background broadcast. \
        Every status change stores a summary under the configured publisher task name.",
    responses(
        (status = 200, description = "Registered", body = RegisterResponse),
        (status = 409, description = "Already registered", body = ErrorResponse),
        (status = 422, description = "Payload does not fit the selected format", body = ErrorResponse),
        (status = 503, description = "Radio unavailable", body = ErrorResponse)
    )
)]
pub async fn register_publisher(
    State(state): State<SharedState>,
) -> ApiResult<Json<RegisterResponse>> {
    let config = state
        .config
        .publisher
        .to_publisher_config()
        .constrained_to(&state.capabilities);
    let task_name = state.config.background.publisher_task.clone();
    register(&state, TriggerConfig::Publisher(config), &task_name).await
}

async fn register(
    state: &SharedState,
    trigger: TriggerConfig,
    task_name: &str,
) -> ApiResult<Json<RegisterResponse>> {
    let access = state.scheduler().access();
    let warning = (!access.is_allowed())
        .then(|| "Background access is denied; the trigger may never run".to_string());

    let attached = state.attach_monitor(task_name);
    let handle = match state.scheduler().register_trigger(trigger, task_name).await {
        Ok(handle) => handle,
        Err(e) => {
            if attached {
                state.detach_monitor(task_name);
            }
            return Err(e.into());
        }
    };
    info!(task_name, id = %handle.id, "Background trigger registered via API");

    Ok(Json(RegisterResponse {
        registration: RegistrationView::from(&handle),
        access: access_name(access).to_string(),
        warning,
    }))
}

/// Unregister the background watcher.
#[utoipa::path(
    delete,
    path = "/api/background/watcher",
    tag = "background",
    operation_id = "unregisterBackgroundWatcher",
    summary = "Unregister background watcher",
    description = "Stops the background watcher. Its last stored result is kept.",
    responses(
        (status = 200, description = "Unregistered", body = UnregisterResponse),
        (status = 404, description = "Not registered", body = ErrorResponse)
    )
)]
pub async fn unregister_watcher(
    State(state): State<SharedState>,
) -> ApiResult<Json<UnregisterResponse>> {
    let task_name = state.config.background.watcher_task.clone();
    unregister(&state, &task_name)
}

/// Unregister the background publisher.
#[utoipa::path(
    delete,
    path = "/api/background/publisher",
    tag = "background",
    operation_id = "unregisterBackgroundPublisher",
    summary = "Unregister background publisher",
    description = "Stops the background broadcast. Its last stored result is kept.",
    responses(
        (status = 200, description = "Unregistered", body = UnregisterResponse),
        (status = 404, description = "Not registered", body = ErrorResponse)
    )
)]
pub async fn unregister_publisher(
    State(state): State<SharedState>,
) -> ApiResult<Json<UnregisterResponse>> {
    let task_name = state.config.background.publisher_task.clone();
    unregister(&state, &task_name)
}

fn unregister(state: &SharedState, task_name: &str) -> ApiResult<Json<UnregisterResponse>> {
    let handle = state
        .scheduler()
        .registration(task_name)
        .ok_or_else(|| BeaconError::RegistrationNotFound(task_name.to_string()))?;
    state.scheduler().unregister(&handle)?;
    state.detach_monitor(task_name);

    Ok(Json(UnregisterResponse {
        task_name: task_name.to_string(),
        registration_id: handle.id,
    }))
}

/// Get the latest stored result of a background task.
#[utoipa::path(
    get,
    path = "/api/background/results/{task_name}",
    tag = "background",
    operation_id = "getBackgroundResult",
    summary = "Get background task result",
    description = "Returns the last value a background cycle stored for this \
        task name. Results survive restarts and unregistration.",
    params(
        ("task_name" = String, Path, description = "Background task name", example = "AdvertisementWatcherTask")
    ),
    responses(
        (status = 200, description = "Stored result", body = TaskResultResponse),
        (status = 400, description = "Invalid task name", body = ErrorResponse),
        (status = 404, description = "No result stored yet", body = ErrorResponse)
    )
)]
pub async fn get_result(
    State(state): State<SharedState>,
    Path(task_name): Path<String>,
) -> ApiResult<Json<TaskResultResponse>> {
    if !beacon_core::is_valid_task_name(&task_name) {
        return Err(BeaconError::InvalidTaskName(task_name).into());
    }
    let result = state
        .bridge()
        .retrieve(&task_name)?
        .ok_or_else(|| ApiError::NotFound {
            error_code: "RESULT_NOT_FOUND".to_string(),
            message: format!("No result stored for '{task_name}'"),
        })?;
    Ok(Json(TaskResultResponse::from(&result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_names_match_serde() {
        for access in [
            BackgroundAccess::AlwaysAllowed,
            BackgroundAccess::AllowedSubjectToSystemPolicy,
            BackgroundAccess::Denied,
        ] {
            let json = serde_json::to_value(access).unwrap();
            assert_eq!(json, serde_json::json!(access_name(access)));
        }
    }

    #[test]
    fn test_task_result_response_text() {
        let result = TaskResult {
            task_name: "AdvertisementPublisherTask".into(),
            summary: "Publisher status: Started".into(),
            sequence: 3,
            error: None,
            recorded_at: chrono::Utc::now(),
        };
        let response = TaskResultResponse::from(&result);
        assert_eq!(response.text, "#3 Publisher status: Started (Success)");
        assert_eq!(response.error, None);
    }
}
