//! Shared handler state, error mapping and operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use leadflow_campaigns::{CampaignEngine, CampaignService, KillSwitchService};
use leadflow_core::event_bus::EventSink;
use leadflow_core::LeadflowError;
use leadflow_store::Store;
use leadflow_workflows::{TriggerEvent, WorkflowEngine, WorkflowService};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub campaigns: CampaignService,
    pub kill_switch: KillSwitchService,
    pub engine: Arc<CampaignEngine>,
    pub workflows: WorkflowService,
    pub workflow_engine: Arc<WorkflowEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Store,
        engine: Arc<CampaignEngine>,
        workflow_engine: Arc<WorkflowEngine>,
        opt_out_keywords: Vec<String>,
        node_id: String,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            campaigns: CampaignService::new(store.clone()).with_event_sink(events.clone()),
            kill_switch: KillSwitchService::new(store.clone(), opt_out_keywords)
                .with_event_sink(events),
            workflows: WorkflowService::new(store.clone()),
            store,
            engine,
            workflow_engine,
            node_id,
            start_time: Instant::now(),
        }
    }

    /// Run matching workflows. Failures are logged, never surfaced to the
    /// request that caused the event.
    pub(crate) async fn dispatch(&self, event: TriggerEvent) -> u64 {
        match self.workflow_engine.dispatch(event).await {
            Ok(runs) => runs.len() as u64,
            Err(e) => {
                error!(error = %e, "Workflow dispatch failed");
                metrics::counter!("api.workflow_dispatch_errors").increment(1);
                0
            }
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// Domain error rendered as `{ error, message }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub LeadflowError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<LeadflowError> for ApiError {
    fn from(e: LeadflowError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            LeadflowError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", self.0.to_string()),
            LeadflowError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_failed", msg.clone()),
            LeadflowError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_transition", self.0.to_string())
            }
            other => {
                error!(error = %other, "Request failed");
                metrics::counter!("api.errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal processing error".to_string(),
                )
            }
        };
        if status.is_client_error() {
            warn!(status = status.as_u16(), error = code, %message, "Request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

/// GET /health: health check.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: 200 once the database answers.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to accept traffic"),
        (status = 503, description = "Database unavailable"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store.db.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /live: liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
