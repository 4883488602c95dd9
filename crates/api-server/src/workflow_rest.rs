//! Workflow definition and run-history endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use leadflow_core::types::{CreateWorkflowRequest, UpdateWorkflowRequest, Workflow, WorkflowRun};
use leadflow_core::LeadflowError;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::rest::{ApiResult, AppState, ErrorResponse};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WorkflowQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RunsQuery {
    pub limit: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/api/v1/workflows",
    tag = "Workflows",
    params(WorkflowQuery),
    responses((status = 200, description = "Workflow definitions", body = Vec<Workflow>))
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowQuery>,
) -> ApiResult<Json<Vec<Workflow>>> {
    Ok(Json(state.workflows.list(query.active_only).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/workflows",
    tag = "Workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Inactive workflow created", body = Workflow),
        (status = 400, description = "Invalid workflow", body = ErrorResponse),
    )
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let workflow = state.workflows.create(req).await?;
    metrics::counter!("api.workflows.created").increment(1);
    Ok((StatusCode::CREATED, Json(workflow)))
}

#[utoipa::path(
    get,
    path = "/api/v1/workflows/{id}",
    tag = "Workflows",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "The workflow", body = Workflow),
        (status = 404, description = "No such workflow", body = ErrorResponse),
    )
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows.get(id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/workflows/{id}",
    tag = "Workflows",
    params(("id" = Uuid, Path, description = "Workflow id")),
    request_body = UpdateWorkflowRequest,
    responses(
        (status = 200, description = "Updated workflow", body = Workflow),
        (status = 400, description = "Active workflow would no longer validate", body = ErrorResponse),
        (status = 404, description = "No such workflow", body = ErrorResponse),
    )
)]
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateWorkflowRequest>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows.update(id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/workflows/{id}",
    tag = "Workflows",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 204, description = "Workflow deleted"),
        (status = 404, description = "No such workflow", body = ErrorResponse),
    )
)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.workflows.delete(id).await? {
        return Err(LeadflowError::not_found("workflow", id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/workflows/{id}/activate",
    tag = "Workflows",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow active", body = Workflow),
        (status = 400, description = "Graph does not validate", body = ErrorResponse),
        (status = 404, description = "No such workflow", body = ErrorResponse),
    )
)]
pub async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows.activate(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/workflows/{id}/deactivate",
    tag = "Workflows",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow inactive", body = Workflow),
        (status = 404, description = "No such workflow", body = ErrorResponse),
    )
)]
pub async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows.deactivate(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/workflows/{id}/runs",
    tag = "Workflows",
    params(("id" = Uuid, Path, description = "Workflow id"), RunsQuery),
    responses(
        (status = 200, description = "Recent runs, newest first", body = Vec<WorkflowRun>),
        (status = 404, description = "No such workflow", body = ErrorResponse),
    )
)]
pub async fn workflow_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<WorkflowRun>>> {
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(state.workflows.runs(id, limit).await?))
}
