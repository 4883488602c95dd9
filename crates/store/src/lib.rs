//! SQLite persistence for leads, campaigns, audiences, messages and workflows.

pub mod audience;
pub mod campaigns;
pub mod db;
pub mod leads;
pub mod messages;
pub mod migrations;
pub mod settings;
pub mod stats;
pub mod workflows;

pub use audience::AudienceRepo;
pub use campaigns::CampaignRepo;
pub use db::Database;
pub use leads::{normalize_phone, LeadRepo};
pub use messages::MessageLog;
pub use settings::{Settings, KILL_SWITCH_KEY};
pub use stats::StatsRepo;
pub use workflows::WorkflowRepo;

/// Every repository over one shared pool.
#[derive(Debug, Clone)]
pub struct Store {
    pub db: Database,
    pub leads: LeadRepo,
    pub campaigns: CampaignRepo,
    pub audience: AudienceRepo,
    pub messages: MessageLog,
    pub settings: Settings,
    pub stats: StatsRepo,
    pub workflows: WorkflowRepo,
}

impl Store {
    pub fn new(db: Database) -> Self {
        let pool = db.pool().clone();
        Self {
            leads: LeadRepo::new(pool.clone()),
            campaigns: CampaignRepo::new(pool.clone()),
            audience: AudienceRepo::new(pool.clone()),
            messages: MessageLog::new(pool.clone()),
            settings: Settings::new(pool.clone()),
            stats: StatsRepo::new(pool.clone()),
            workflows: WorkflowRepo::new(pool),
            db,
        }
    }

    /// Fresh in-memory store with migrations applied.
    pub async fn in_memory() -> leadflow_core::LeadflowResult<Self> {
        Ok(Self::new(Database::in_memory().await?))
    }
}
