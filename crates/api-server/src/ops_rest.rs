//! Kill switch, inbound webhook and manual scheduler tick.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use leadflow_core::types::{InboundOutcome, TickReport};
use leadflow_workflows::TriggerEvent;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::rest::{ApiResult, AppState, ErrorResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct KillSwitchStatus {
    pub engaged: bool,
}

/// Payload posted by the WhatsApp bridge for every inbound message.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/kill-switch",
    tag = "Kill switch",
    responses((status = 200, description = "Current global kill switch state", body = KillSwitchStatus))
)]
pub async fn kill_switch_status(State(state): State<AppState>) -> ApiResult<Json<KillSwitchStatus>> {
    Ok(Json(KillSwitchStatus {
        engaged: state.kill_switch.is_engaged().await?,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/kill-switch",
    tag = "Kill switch",
    responses((status = 200, description = "All outbound messages halted", body = KillSwitchStatus))
)]
pub async fn engage_kill_switch(State(state): State<AppState>) -> ApiResult<Json<KillSwitchStatus>> {
    state.kill_switch.engage().await?;
    Ok(Json(KillSwitchStatus { engaged: true }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/kill-switch",
    tag = "Kill switch",
    responses((status = 200, description = "Outbound messages resumed", body = KillSwitchStatus))
)]
pub async fn release_kill_switch(State(state): State<AppState>) -> ApiResult<Json<KillSwitchStatus>> {
    state.kill_switch.release().await?;
    Ok(Json(KillSwitchStatus { engaged: false }))
}

/// POST /api/v1/webhooks/whatsapp: opt-out keywords first; any other
/// message from a known lead starts `message_received` workflows.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/whatsapp",
    tag = "Webhooks",
    request_body = InboundMessage,
    responses(
        (status = 200, description = "Message handled", body = InboundOutcome),
        (status = 500, description = "Processing failed", body = ErrorResponse),
    )
)]
pub async fn whatsapp_webhook(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> ApiResult<Json<InboundOutcome>> {
    metrics::counter!("api.webhooks.inbound").increment(1);
    let mut outcome = state
        .kill_switch
        .handle_inbound(&message.from, &message.body)
        .await?;

    if let (Some(lead_id), false) = (outcome.lead_id, outcome.opted_out) {
        outcome.workflow_runs = state
            .dispatch(TriggerEvent::MessageReceived {
                lead_id,
                body: message.body,
            })
            .await;
    }
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/v1/scheduler/tick",
    tag = "Scheduler",
    responses(
        (status = 200, description = "Work done by one engine pass", body = TickReport),
        (status = 500, description = "Tick failed", body = ErrorResponse),
    )
)]
pub async fn manual_tick(State(state): State<AppState>) -> ApiResult<Json<TickReport>> {
    let report = state.engine.tick(Utc::now()).await?;
    info!(
        claimed = report.claimed,
        sent = report.sent,
        failed = report.failed,
        "Manual scheduler tick"
    );
    Ok(Json(report))
}
