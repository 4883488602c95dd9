//! Campaign lifecycle and the audience progression engine.
//!
//! All progress lives in the database: [`CampaignEngine::tick`] claims due
//! audience rows, advances each one through message and wait steps and
//! writes the result back before releasing the row.

pub mod engine;
pub mod kill_switch;
pub mod scheduler;
pub mod service;
pub mod state_machine;

pub use engine::{CampaignEngine, EngineSettings};
pub use kill_switch::KillSwitchService;
pub use scheduler::Scheduler;
pub use service::CampaignService;
pub use state_machine::{AudienceStateMachine, CampaignStateMachine, CampaignTrigger};
