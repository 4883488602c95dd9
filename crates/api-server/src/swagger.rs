//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "LeadFlow API",
        version = "0.1.0",
        description = "Lead management, WhatsApp drip campaigns and trigger-driven workflows.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Operations", description = "Health, readiness, and liveness probes"),
        (name = "Leads", description = "Lead records, opt-out and message history"),
        (name = "Campaigns", description = "Campaign steps, audience and lifecycle"),
        (name = "Kill switch", description = "Global halt of outbound messages"),
        (name = "Webhooks", description = "Inbound messages from the WhatsApp bridge"),
        (name = "Scheduler", description = "Manual engine tick"),
        (name = "Workflows", description = "Trigger-driven automations"),
    ),
    paths(
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
        // Leads
        crate::lead_rest::list_leads,
        crate::lead_rest::create_lead,
        crate::lead_rest::get_lead,
        crate::lead_rest::update_lead,
        crate::lead_rest::delete_lead,
        crate::lead_rest::opt_out_lead,
        crate::lead_rest::opt_in_lead,
        crate::lead_rest::lead_messages,
        // Campaigns
        crate::campaign_rest::list_campaigns,
        crate::campaign_rest::create_campaign,
        crate::campaign_rest::get_campaign,
        crate::campaign_rest::update_campaign,
        crate::campaign_rest::delete_campaign,
        crate::campaign_rest::set_steps,
        crate::campaign_rest::add_step,
        crate::campaign_rest::enroll,
        crate::campaign_rest::list_audience,
        crate::campaign_rest::remove_member,
        crate::campaign_rest::start_campaign,
        crate::campaign_rest::schedule_campaign,
        crate::campaign_rest::pause_campaign,
        crate::campaign_rest::resume_campaign,
        crate::campaign_rest::cancel_campaign,
        crate::campaign_rest::retry_failed,
        crate::campaign_rest::campaign_stats,
        // Kill switch, webhooks, scheduler
        crate::ops_rest::kill_switch_status,
        crate::ops_rest::engage_kill_switch,
        crate::ops_rest::release_kill_switch,
        crate::ops_rest::whatsapp_webhook,
        crate::ops_rest::manual_tick,
        // Workflows
        crate::workflow_rest::list_workflows,
        crate::workflow_rest::create_workflow,
        crate::workflow_rest::get_workflow,
        crate::workflow_rest::update_workflow,
        crate::workflow_rest::delete_workflow,
        crate::workflow_rest::activate_workflow,
        crate::workflow_rest::deactivate_workflow,
        crate::workflow_rest::workflow_runs,
    ),
    components(schemas(
        // REST error/health types
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
        // Leads
        leadflow_core::types::Lead,
        leadflow_core::types::LeadStatus,
        leadflow_core::types::CreateLeadRequest,
        leadflow_core::types::UpdateLeadRequest,
        leadflow_core::types::LeadFilter,
        leadflow_core::types::MessageRecord,
        leadflow_core::types::DeliveryStatus,
        crate::lead_rest::OptOutRequest,
        // Campaigns
        leadflow_core::types::Campaign,
        leadflow_core::types::CampaignStatus,
        leadflow_core::types::CampaignDetail,
        leadflow_core::types::CampaignStep,
        leadflow_core::types::StepKind,
        leadflow_core::types::CreateCampaignRequest,
        leadflow_core::types::UpdateCampaignRequest,
        leadflow_core::types::AudienceMember,
        leadflow_core::types::AudienceStatus,
        leadflow_core::types::EnrollRequest,
        leadflow_core::types::EnrollOutcome,
        leadflow_core::types::CampaignStats,
        leadflow_core::types::StepReach,
        crate::campaign_rest::ScheduleRequest,
        crate::campaign_rest::RetryResponse,
        // Operations
        leadflow_core::types::TickReport,
        leadflow_core::types::InboundOutcome,
        crate::ops_rest::KillSwitchStatus,
        crate::ops_rest::InboundMessage,
        // Workflows
        leadflow_core::types::Workflow,
        leadflow_core::types::WorkflowTrigger,
        leadflow_core::types::WorkflowNode,
        leadflow_core::types::NodeKind,
        leadflow_core::types::Condition,
        leadflow_core::types::LeadField,
        leadflow_core::types::WorkflowEdge,
        leadflow_core::types::CreateWorkflowRequest,
        leadflow_core::types::UpdateWorkflowRequest,
        leadflow_core::types::WorkflowRun,
        leadflow_core::types::RunStatus,
        leadflow_core::types::RunStep,
    ))
)]
pub struct ApiDoc;
