//! Trigger-driven lead automations, independent of campaigns.
//!
//! A workflow is a directed acyclic graph rooted at a single trigger node.
//! [`WorkflowEngine::dispatch`] runs every active workflow whose trigger
//! matches an event and records the run.

pub mod engine;
pub mod executor;
pub mod graph;
pub mod service;
pub mod trigger;

pub use engine::WorkflowEngine;
pub use executor::{ActionExecutor, StoreActionExecutor};
pub use graph::validate;
pub use service::WorkflowService;
pub use trigger::TriggerEvent;
