use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum that is
/// persisted as snake_case TEXT.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

// ─── Leads ──────────────────────────────────────────────────────────────────

/// A contact tracked through the sales pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub status: LeadStatus,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    /// Kill switch: once set, nothing more is sent to this lead.
    pub opted_out: bool,
    pub opted_out_at: Option<DateTime<Utc>>,
    pub opt_out_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

text_enum!(LeadStatus {
    New => "new",
    Contacted => "contacted",
    Qualified => "qualified",
    Converted => "converted",
    Lost => "lost",
});

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateLeadRequest {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<LeadStatus>,
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateLeadRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Option<LeadStatus>,
    pub source: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

/// Filter used when listing leads or enrolling a segment into a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub tag: Option<String>,
    /// Substring match on name, phone or email.
    pub search: Option<String>,
    #[serde(default)]
    pub include_opted_out: bool,
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

/// A named, ordered sequence of message and wait steps applied to an audience.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

text_enum!(CampaignStatus {
    Draft => "draft",
    Scheduled => "scheduled",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Steps may only be edited before the campaign starts sending.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<StepKind>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// One step of a campaign. Positions are dense and start at zero.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignStep {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub position: u32,
    pub kind: StepKind,
    pub created_at: DateTime<Utc>,
}

/// Longest accepted wait step: one year.
pub const MAX_WAIT_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StepKind {
    Message { template: String },
    Wait { delay_secs: u64 },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Wait { .. } => "wait",
        }
    }
}

/// A campaign together with its ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub steps: Vec<CampaignStep>,
}

/// What one scheduler pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TickReport {
    /// Scheduled campaigns that started.
    pub promoted: u64,
    pub claimed: u64,
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub completed_members: u64,
    pub opted_out: u64,
    /// Sends pushed back by quiet hours, throttling or the global kill switch.
    pub deferred: u64,
    pub campaigns_completed: u64,
    pub errors: u64,
}

impl TickReport {
    pub fn did_work(&self) -> bool {
        self.promoted + self.claimed + self.campaigns_completed + self.errors > 0
    }
}

// ─── Campaign audience ──────────────────────────────────────────────────────

/// A lead's progress through one campaign.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AudienceMember {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub status: AudienceStatus,
    /// Position of the next step to execute.
    pub current_step: u32,
    /// Failed send attempts for the current step.
    pub attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AudienceStatus {
    #[default]
    Pending,
    InProgress,
    Waiting,
    Completed,
    Failed,
    OptedOut,
    Cancelled,
}

text_enum!(AudienceStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Waiting => "waiting",
    Completed => "completed",
    Failed => "failed",
    OptedOut => "opted_out",
    Cancelled => "cancelled",
});

impl AudienceStatus {
    pub const ALL: [AudienceStatus; 7] = [
        Self::Pending,
        Self::InProgress,
        Self::Waiting,
        Self::Completed,
        Self::Failed,
        Self::OptedOut,
        Self::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::OptedOut | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct EnrollRequest {
    #[serde(default)]
    pub lead_ids: Vec<Uuid>,
    /// Enrolls every lead matching the filter in addition to `lead_ids`.
    pub filter: Option<LeadFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EnrollOutcome {
    pub enrolled: u64,
    pub already_enrolled: u64,
    pub skipped_opted_out: u64,
    pub unknown_leads: u64,
}

/// Result of processing one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InboundOutcome {
    /// The lead the sender's number belongs to, if known.
    pub lead_id: Option<Uuid>,
    /// Whether this message opted the lead out.
    pub opted_out: bool,
    /// Workflow runs started by this message.
    pub workflow_runs: u64,
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageRecord {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub audience_id: Option<Uuid>,
    pub lead_id: Uuid,
    pub step_position: Option<u32>,
    pub channel: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

text_enum!(DeliveryStatus {
    Sent => "sent",
    Failed => "failed",
});

// ─── Stats ──────────────────────────────────────────────────────────────────

/// How many audience members reached (or passed) a given step.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepReach {
    pub position: u32,
    pub kind: String,
    pub reached: u64,
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub waiting: u64,
    pub completed: u64,
    pub failed: u64,
    pub opted_out: u64,
    pub cancelled: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub completion_rate: f64,
    pub step_reach: Vec<StepReach>,
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Domain event emitted through the [`crate::event_bus::EventSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub subject_id: String,
    pub lead_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LeadCreated,
    LeadUpdated,
    LeadOptedOut,
    LeadOptedIn,
    CampaignStarted,
    CampaignPaused,
    CampaignResumed,
    CampaignCompleted,
    CampaignCancelled,
    AudienceEnrolled,
    AudienceCompleted,
    AudienceFailed,
    MessageSent,
    MessageFailed,
    MessageRetryScheduled,
    KillSwitchEngaged,
    KillSwitchReleased,
    WorkflowRunSucceeded,
    WorkflowRunFailed,
}

// ─── Workflows ──────────────────────────────────────────────────────────────

/// A trigger-driven automation graph. Independent of campaigns.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub trigger: WorkflowTrigger,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum WorkflowTrigger {
    LeadCreated,
    /// Fires on any status change, or only when the new status is `to`.
    LeadStatusChanged { to: Option<LeadStatus> },
    MessageReceived { keyword: Option<String> },
    TagAdded { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NodeKind {
    Trigger,
    SendMessage { template: String },
    UpdateStatus { status: LeadStatus },
    AddTag { tag: String },
    EnrollInCampaign { campaign_id: Uuid },
    Condition { condition: Condition },
    Stop,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::SendMessage { .. } => "send_message",
            Self::UpdateStatus { .. } => "update_status",
            Self::AddTag { .. } => "add_tag",
            Self::EnrollInCampaign { .. } => "enroll_in_campaign",
            Self::Condition { .. } => "condition",
            Self::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Condition {
    StatusIs { status: LeadStatus },
    HasTag { tag: String },
    FieldPresent { field: LeadField },
}

impl Condition {
    pub fn evaluate(&self, lead: &Lead) -> bool {
        match self {
            Self::StatusIs { status } => lead.status == *status,
            Self::HasTag { tag } => lead.has_tag(tag),
            Self::FieldPresent { field } => {
                let value = match field {
                    LeadField::Email => lead.email.as_deref(),
                    LeadField::Source => lead.source.as_deref(),
                    LeadField::Notes => lead.notes.as_deref(),
                };
                value.is_some_and(|v| !v.trim().is_empty())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeadField {
    Email,
    Source,
    Notes,
}

/// Directed edge. Out-edges of a condition node carry the branch they follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub branch: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<WorkflowTrigger>,
    pub nodes: Option<Vec<WorkflowNode>>,
    pub edges: Option<Vec<WorkflowEdge>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub status: RunStatus,
    pub steps: Vec<RunStep>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

text_enum!(RunStatus {
    Succeeded => "succeeded",
    Failed => "failed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunStep {
    pub node_id: String,
    pub action: String,
    pub outcome: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trip() {
        for status in AudienceStatus::ALL {
            assert_eq!(status.as_str().parse::<AudienceStatus>().unwrap(), status);
        }
        assert_eq!("in_progress".parse::<AudienceStatus>().unwrap(), AudienceStatus::InProgress);
        assert!("nope".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(AudienceStatus::OptedOut.is_terminal());
        assert!(AudienceStatus::Failed.is_terminal());
        assert!(!AudienceStatus::Waiting.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn test_step_kind_serde_shape() {
        let step = StepKind::Wait { delay_secs: 60 };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "wait");
        assert_eq!(json["delay_secs"], 60);
    }

    #[test]
    fn test_first_name() {
        let now = Utc::now();
        let lead = Lead {
            id: Uuid::new_v4(),
            name: "Ana Souza".into(),
            phone: "5511999999999".into(),
            email: None,
            status: LeadStatus::New,
            source: None,
            tags: vec!["VIP".into()],
            notes: None,
            opted_out: false,
            opted_out_at: None,
            opt_out_reason: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(lead.first_name(), "Ana");
        assert!(lead.has_tag("vip"));

        assert!(Condition::HasTag { tag: "vip".into() }.evaluate(&lead));
        assert!(!Condition::FieldPresent { field: LeadField::Email }.evaluate(&lead));
        assert!(Condition::StatusIs { status: LeadStatus::New }.evaluate(&lead));
    }

    #[test]
    fn test_workflow_node_serde_shape() {
        let node: WorkflowNode = serde_json::from_value(serde_json::json!({
            "id": "tag",
            "kind": { "type": "add_tag", "tag": "hot" }
        }))
        .unwrap();
        assert_eq!(node.kind, NodeKind::AddTag { tag: "hot".into() });

        let edge: WorkflowEdge =
            serde_json::from_value(serde_json::json!({ "from": "a", "to": "b" })).unwrap();
        assert_eq!(edge.branch, None);
    }
}
