//! Campaign REST endpoints: definitions, audience and lifecycle.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use leadflow_core::types::{
    AudienceMember, AudienceStatus, Campaign, CampaignDetail, CampaignStats, CampaignStatus,
    CampaignStep, CreateCampaignRequest, EnrollOutcome, EnrollRequest, StepKind,
    UpdateCampaignRequest,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::rest::{ApiResult, AppState, ErrorResponse};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CampaignQuery {
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AudienceQuery {
    pub status: Option<AudienceStatus>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RetryResponse {
    pub requeued: u64,
}

#[utoipa::path(
    get,
    path = "/api/v1/campaigns",
    tag = "Campaigns",
    params(CampaignQuery),
    responses((status = 200, description = "Campaigns, newest first", body = Vec<Campaign>))
)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<CampaignQuery>,
) -> ApiResult<Json<Vec<Campaign>>> {
    Ok(Json(state.campaigns.list(query.status).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns",
    tag = "Campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 201, description = "Draft campaign created", body = Campaign),
        (status = 400, description = "Invalid campaign", body = ErrorResponse),
    )
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.campaigns.create(req).await?;
    metrics::counter!("api.campaigns.created").increment(1);
    Ok((StatusCode::CREATED, Json(campaign)))
}

#[utoipa::path(
    get,
    path = "/api/v1/campaigns/{id}",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign with its steps", body = CampaignDetail),
        (status = 404, description = "No such campaign", body = ErrorResponse),
    )
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CampaignDetail>> {
    Ok(Json(state.campaigns.get(id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/campaigns/{id}",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    request_body = UpdateCampaignRequest,
    responses(
        (status = 200, description = "Updated campaign", body = Campaign),
        (status = 400, description = "Campaign is no longer editable", body = ErrorResponse),
        (status = 404, description = "No such campaign", body = ErrorResponse),
    )
)]
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCampaignRequest>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.update(id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/campaigns/{id}",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 204, description = "Campaign deleted"),
        (status = 400, description = "Campaign is active", body = ErrorResponse),
        (status = 404, description = "No such campaign", body = ErrorResponse),
    )
)]
pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.campaigns.delete(id).await?;
    metrics::counter!("api.campaigns.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/campaigns/{id}/steps",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    request_body = Vec<StepKind>,
    responses(
        (status = 200, description = "Replaced step list", body = Vec<CampaignStep>),
        (status = 400, description = "Invalid steps or campaign not editable", body = ErrorResponse),
    )
)]
pub async fn set_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(steps): Json<Vec<StepKind>>,
) -> ApiResult<Json<Vec<CampaignStep>>> {
    Ok(Json(state.campaigns.set_steps(id, steps).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/steps",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    request_body = StepKind,
    responses(
        (status = 201, description = "Step appended", body = CampaignStep),
        (status = 400, description = "Invalid step or campaign not editable", body = ErrorResponse),
    )
)]
pub async fn add_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(step): Json<StepKind>,
) -> ApiResult<(StatusCode, Json<CampaignStep>)> {
    Ok((StatusCode::CREATED, Json(state.campaigns.add_step(id, step).await?)))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/audience",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "Enrollment summary", body = EnrollOutcome),
        (status = 400, description = "Nothing to enroll or campaign finished", body = ErrorResponse),
    )
)]
pub async fn enroll(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EnrollRequest>,
) -> ApiResult<Json<EnrollOutcome>> {
    Ok(Json(state.campaigns.enroll_request(id, req).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/campaigns/{id}/audience",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id"), AudienceQuery),
    responses((status = 200, description = "Audience members", body = Vec<AudienceMember>))
)]
pub async fn list_audience(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AudienceQuery>,
) -> ApiResult<Json<Vec<AudienceMember>>> {
    Ok(Json(state.campaigns.audience(id, query.status).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/campaigns/{id}/audience/{lead_id}",
    tag = "Campaigns",
    params(
        ("id" = Uuid, Path, description = "Campaign id"),
        ("lead_id" = Uuid, Path, description = "Lead id"),
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 404, description = "Lead not in audience", body = ErrorResponse),
    )
)]
pub async fn remove_member(
    State(state): State<AppState>,
    Path((id, lead_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state.campaigns.remove_member(id, lead_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/start",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign running", body = Campaign),
        (status = 409, description = "Transition not allowed", body = ErrorResponse),
    )
)]
pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.start(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/schedule",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Campaign scheduled", body = Campaign),
        (status = 400, description = "Start time is in the past", body = ErrorResponse),
        (status = 409, description = "Transition not allowed", body = ErrorResponse),
    )
)]
pub async fn schedule_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.schedule(id, req.at).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/pause",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign paused", body = Campaign),
        (status = 409, description = "Transition not allowed", body = ErrorResponse),
    )
)]
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.pause(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/resume",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign running again", body = Campaign),
        (status = 409, description = "Transition not allowed", body = ErrorResponse),
    )
)]
pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.resume(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/cancel",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign cancelled", body = Campaign),
        (status = 409, description = "Transition not allowed", body = ErrorResponse),
    )
)]
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.cancel(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/campaigns/{id}/retry-failed",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Failed members requeued", body = RetryResponse),
        (status = 409, description = "Campaign cannot be retried", body = ErrorResponse),
    )
)]
pub async fn retry_failed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RetryResponse>> {
    let requeued = state.campaigns.retry_failed(id).await?;
    Ok(Json(RetryResponse { requeued }))
}

#[utoipa::path(
    get,
    path = "/api/v1/campaigns/{id}/stats",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Delivery and funnel stats", body = CampaignStats),
        (status = 404, description = "No such campaign", body = ErrorResponse),
    )
)]
pub async fn campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CampaignStats>> {
    Ok(Json(state.campaigns.stats(id).await?))
}
