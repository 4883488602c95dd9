//! Lead REST endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use leadflow_core::types::{
    CreateLeadRequest, Lead, LeadFilter, LeadStatus, MessageRecord, UpdateLeadRequest,
};
use leadflow_core::LeadflowError;
use leadflow_workflows::TriggerEvent;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::rest::{ApiResult, AppState, ErrorResponse};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeadQuery {
    pub status: Option<LeadStatus>,
    pub tag: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_opted_out: bool,
}

impl From<LeadQuery> for LeadFilter {
    fn from(q: LeadQuery) -> Self {
        Self {
            status: q.status,
            tag: q.tag,
            search: q.search,
            include_opted_out: q.include_opted_out,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct OptOutRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/leads",
    tag = "Leads",
    params(LeadQuery),
    responses((status = 200, description = "Leads matching the filter", body = Vec<Lead>))
)]
pub async fn list_leads(
    State(state): State<AppState>,
    Query(query): Query<LeadQuery>,
) -> ApiResult<Json<Vec<Lead>>> {
    Ok(Json(state.store.leads.list(&query.into()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/leads",
    tag = "Leads",
    request_body = CreateLeadRequest,
    responses(
        (status = 201, description = "Lead created", body = Lead),
        (status = 400, description = "Invalid lead", body = ErrorResponse),
    )
)]
pub async fn create_lead(
    State(state): State<AppState>,
    Json(req): Json<CreateLeadRequest>,
) -> ApiResult<(StatusCode, Json<Lead>)> {
    let lead = state.store.leads.create(req).await?;
    metrics::counter!("api.leads.created").increment(1);
    state
        .dispatch(TriggerEvent::LeadCreated { lead_id: lead.id })
        .await;
    // Workflows may have changed the lead already.
    let lead = state.store.leads.require(lead.id).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

#[utoipa::path(
    get,
    path = "/api/v1/leads/{id}",
    tag = "Leads",
    params(("id" = Uuid, Path, description = "Lead id")),
    responses(
        (status = 200, description = "The lead", body = Lead),
        (status = 404, description = "No such lead", body = ErrorResponse),
    )
)]
pub async fn get_lead(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Lead>> {
    Ok(Json(state.store.leads.require(id).await?))
}

/// Status changes and newly added tags start matching workflows.
#[utoipa::path(
    put,
    path = "/api/v1/leads/{id}",
    tag = "Leads",
    params(("id" = Uuid, Path, description = "Lead id")),
    request_body = UpdateLeadRequest,
    responses(
        (status = 200, description = "Updated lead", body = Lead),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "No such lead", body = ErrorResponse),
    )
)]
pub async fn update_lead(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLeadRequest>,
) -> ApiResult<Json<Lead>> {
    let (before, after) = state.store.leads.update(id, req).await?;

    let mut dispatched = 0;
    if before.status != after.status {
        dispatched += state
            .dispatch(TriggerEvent::LeadStatusChanged {
                lead_id: id,
                from: before.status,
                to: after.status,
            })
            .await;
    }
    for tag in after.tags.iter().filter(|t| !before.has_tag(t)) {
        dispatched += state
            .dispatch(TriggerEvent::TagAdded {
                lead_id: id,
                tag: tag.clone(),
            })
            .await;
    }

    if dispatched > 0 {
        return Ok(Json(state.store.leads.require(id).await?));
    }
    Ok(Json(after))
}

#[utoipa::path(
    delete,
    path = "/api/v1/leads/{id}",
    tag = "Leads",
    params(("id" = Uuid, Path, description = "Lead id")),
    responses(
        (status = 204, description = "Lead deleted"),
        (status = 404, description = "No such lead", body = ErrorResponse),
    )
)]
pub async fn delete_lead(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    if !state.store.leads.delete(id).await? {
        return Err(LeadflowError::not_found("lead", id).into());
    }
    metrics::counter!("api.leads.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/leads/{id}/opt-out",
    tag = "Leads",
    params(("id" = Uuid, Path, description = "Lead id")),
    request_body(content = OptOutRequest, description = "Optional reason"),
    responses(
        (status = 200, description = "Lead opted out", body = Lead),
        (status = 404, description = "No such lead", body = ErrorResponse),
    )
)]
pub async fn opt_out_lead(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<OptOutRequest>>,
) -> ApiResult<Json<Lead>> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "manual".to_string());
    Ok(Json(state.kill_switch.opt_out_lead(id, &reason).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/leads/{id}/opt-in",
    tag = "Leads",
    params(("id" = Uuid, Path, description = "Lead id")),
    responses(
        (status = 200, description = "Lead opted back in", body = Lead),
        (status = 404, description = "No such lead", body = ErrorResponse),
    )
)]
pub async fn opt_in_lead(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Lead>> {
    Ok(Json(state.kill_switch.opt_in_lead(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/leads/{id}/messages",
    tag = "Leads",
    params(("id" = Uuid, Path, description = "Lead id"), LimitQuery),
    responses(
        (status = 200, description = "Message history, newest first", body = Vec<MessageRecord>),
        (status = 404, description = "No such lead", body = ErrorResponse),
    )
)]
pub async fn lead_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<MessageRecord>>> {
    state.store.leads.require(id).await?;
    let limit = query.limit.unwrap_or(100).min(1000);
    Ok(Json(state.store.messages.list_for_lead(id, limit).await?))
}
