#![warn(clippy::unwrap_used)]

pub mod campaign_rest;
pub mod lead_rest;
pub mod ops_rest;
pub mod rest;
pub mod router;
pub mod server;
pub mod swagger;
pub mod workflow_rest;

pub use rest::AppState;
pub use router::app_router;
pub use server::ApiServer;
pub use swagger::ApiDoc;
