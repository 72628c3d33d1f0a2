pub mod api;
pub mod config;
pub mod error;
pub mod git;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod signature;
pub mod url;
pub mod webhook;

#[cfg(test)]
mod test_support;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use crate::pipeline::DeploymentPipeline;
use crate::queue::DeploymentQueue;

pub struct AppState {
    pub webhook_secret: String,
    pub pipeline: Arc<DeploymentPipeline>,
    pub queue: DeploymentQueue,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;
