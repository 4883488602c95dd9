//! Mounts every endpoint on one router.

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{campaign_rest, lead_rest, ops_rest, workflow_rest};

/// Build the full application router, Swagger UI included.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Leads
        .route("/api/v1/leads", get(lead_rest::list_leads).post(lead_rest::create_lead))
        .route(
            "/api/v1/leads/:id",
            get(lead_rest::get_lead)
                .put(lead_rest::update_lead)
                .delete(lead_rest::delete_lead),
        )
        .route("/api/v1/leads/:id/opt-out", post(lead_rest::opt_out_lead))
        .route("/api/v1/leads/:id/opt-in", post(lead_rest::opt_in_lead))
        .route("/api/v1/leads/:id/messages", get(lead_rest::lead_messages))
        // Campaigns
        .route(
            "/api/v1/campaigns",
            get(campaign_rest::list_campaigns).post(campaign_rest::create_campaign),
        )
        .route(
            "/api/v1/campaigns/:id",
            get(campaign_rest::get_campaign)
                .put(campaign_rest::update_campaign)
                .delete(campaign_rest::delete_campaign),
        )
        .route(
            "/api/v1/campaigns/:id/steps",
            put(campaign_rest::set_steps).post(campaign_rest::add_step),
        )
        .route(
            "/api/v1/campaigns/:id/audience",
            get(campaign_rest::list_audience).post(campaign_rest::enroll),
        )
        .route(
            "/api/v1/campaigns/:id/audience/:lead_id",
            delete(campaign_rest::remove_member),
        )
        .route("/api/v1/campaigns/:id/start", post(campaign_rest::start_campaign))
        .route("/api/v1/campaigns/:id/schedule", post(campaign_rest::schedule_campaign))
        .route("/api/v1/campaigns/:id/pause", post(campaign_rest::pause_campaign))
        .route("/api/v1/campaigns/:id/resume", post(campaign_rest::resume_campaign))
        .route("/api/v1/campaigns/:id/cancel", post(campaign_rest::cancel_campaign))
        .route("/api/v1/campaigns/:id/retry-failed", post(campaign_rest::retry_failed))
        .route("/api/v1/campaigns/:id/stats", get(campaign_rest::campaign_stats))
        // Kill switch and inbound
        .route(
            "/api/v1/kill-switch",
            get(ops_rest::kill_switch_status)
                .post(ops_rest::engage_kill_switch)
                .delete(ops_rest::release_kill_switch),
        )
        .route("/api/v1/webhooks/whatsapp", post(ops_rest::whatsapp_webhook))
        .route("/api/v1/scheduler/tick", post(ops_rest::manual_tick))
        // Workflows
        .route(
            "/api/v1/workflows",
            get(workflow_rest::list_workflows).post(workflow_rest::create_workflow),
        )
        .route(
            "/api/v1/workflows/:id",
            get(workflow_rest::get_workflow)
                .put(workflow_rest::update_workflow)
                .delete(workflow_rest::delete_workflow),
        )
        .route("/api/v1/workflows/:id/activate", post(workflow_rest::activate_workflow))
        .route("/api/v1/workflows/:id/deactivate", post(workflow_rest::deactivate_workflow))
        .route("/api/v1/workflows/:id/runs", get(workflow_rest::workflow_runs))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use leadflow_campaigns::{CampaignEngine, CampaignService, EngineSettings};
    use leadflow_channels::RecordingSender;
    use leadflow_core::config::OptOutConfig;
    use leadflow_core::event_bus::noop_sink;
    use leadflow_delivery::{DeliveryGate, RetryPolicy};
    use leadflow_store::Store;
    use leadflow_workflows::{StoreActionExecutor, WorkflowEngine};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<RecordingSender>) {
        let store = Store::in_memory().await.unwrap();
        let sender = Arc::new(RecordingSender::new());
        let engine = Arc::new(CampaignEngine::new(
            store.clone(),
            sender.clone(),
            DeliveryGate::permissive("recording"),
            RetryPolicy::default(),
            EngineSettings::default(),
        ));
        let executor = StoreActionExecutor::new(
            store.clone(),
            CampaignService::new(store.clone()),
            sender.clone(),
        );
        let workflow_engine = Arc::new(WorkflowEngine::new(store.clone(), Arc::new(executor)));
        let state = AppState::new(
            store,
            engine,
            workflow_engine,
            OptOutConfig::default().keywords,
            "test-node".into(),
            noop_sink(),
        );
        (app_router(state), sender)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_lead(app: &Router, phone: &str) -> String {
        let (status, lead) = call(
            app,
            Method::POST,
            "/api/v1/leads",
            Some(json!({ "name": "Ana Souza", "phone": phone })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        lead["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_and_errors() {
        let (app, _) = app().await;
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "test-node");
        assert_eq!(call(&app, Method::GET, "/ready", None).await.0, StatusCode::OK);

        let missing = format!("/api/v1/leads/{}", uuid::Uuid::new_v4());
        let (status, body) = call(&app, Method::GET, &missing, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/leads",
            Some(json!({ "name": "  ", "phone": "5511900000001" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn test_campaign_lifecycle_over_http() {
        let (app, sender) = app().await;
        let lead_id = create_lead(&app, "5511900000001").await;

        let (status, campaign) = call(
            &app,
            Method::POST,
            "/api/v1/campaigns",
            Some(json!({
                "name": "Welcome",
                "steps": [{ "type": "message", "template": "Hi {{first_name}}" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = campaign["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, Method::POST, &format!("/api/v1/campaigns/{id}/pause"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, outcome) = call(
            &app,
            Method::POST,
            &format!("/api/v1/campaigns/{id}/audience"),
            Some(json!({ "lead_ids": [lead_id] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["enrolled"], 1);

        let (status, started) = call(&app, Method::POST, &format!("/api/v1/campaigns/{id}/start"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["status"], "running");

        let (status, report) = call(&app, Method::POST, "/api/v1/scheduler/tick", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["sent"], 1);
        assert_eq!(sender.sent()[0].body, "Hi Ana");

        let (_, stats) = call(&app, Method::GET, &format!("/api/v1/campaigns/{id}/stats"), None).await;
        assert_eq!(stats["messages_sent"], 1);

        let (_, history) = call(&app, Method::GET, &format!("/api/v1/leads/{lead_id}/messages"), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_stop_and_kill_switch() {
        let (app, _) = app().await;
        let lead_id = create_lead(&app, "5511900000002").await;

        let (status, outcome) = call(
            &app,
            Method::POST,
            "/api/v1/webhooks/whatsapp",
            Some(json!({ "from": "+55 11 90000-0002", "body": "STOP" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["opted_out"], true);
        assert_eq!(outcome["lead_id"], lead_id.as_str());

        let (_, lead) = call(&app, Method::GET, &format!("/api/v1/leads/{lead_id}"), None).await;
        assert_eq!(lead["opted_out"], true);

        let (_, switch) = call(&app, Method::POST, "/api/v1/kill-switch", None).await;
        assert_eq!(switch["engaged"], true);
        let (_, switch) = call(&app, Method::GET, "/api/v1/kill-switch", None).await;
        assert_eq!(switch["engaged"], true);
        let (_, switch) = call(&app, Method::DELETE, "/api/v1/kill-switch", None).await;
        assert_eq!(switch["engaged"], false);
    }

    #[tokio::test]
    async fn test_lead_created_runs_active_workflow() {
        let (app, _) = app().await;
        let (status, wf) = call(
            &app,
            Method::POST,
            "/api/v1/workflows",
            Some(json!({
                "name": "Tag new leads",
                "trigger": { "type": "lead_created" },
                "nodes": [
                    { "id": "start", "kind": { "type": "trigger" } },
                    { "id": "tag", "kind": { "type": "add_tag", "tag": "inbound" } }
                ],
                "edges": [{ "from": "start", "to": "tag" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let wf_id = wf["id"].as_str().unwrap().to_string();

        let (status, active) = call(&app, Method::POST, &format!("/api/v1/workflows/{wf_id}/activate"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(active["active"], true);

        let (_, lead) = call(
            &app,
            Method::POST,
            "/api/v1/leads",
            Some(json!({ "name": "Bruno", "phone": "5511900000003" })),
        )
        .await;
        assert_eq!(lead["tags"], json!(["inbound"]));

        let (_, runs) = call(&app, Method::GET, &format!("/api/v1/workflows/{wf_id}/runs"), None).await;
        assert_eq!(runs.as_array().unwrap().len(), 1);
        assert_eq!(runs[0]["status"], "succeeded");
    }
}
