//! Health, status and target listing endpoints

use axum::{Json, extract::State as AxumState};
use serde::Serialize;
use serde_json::{Value, json};

use crate::SharedState;

/// Server status
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub watched_targets: usize,
}

/// One watched target as exposed over HTTP
#[derive(Debug, Serialize)]
pub struct TargetSummary {
    pub path: String,
    pub branch: String,
    pub remote_url: String,
    pub command: String,
    pub command_timeout_secs: u64,
    pub notify_on_success: bool,
}

/// GET / - Service name, version and uptime
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<ServerStatus> {
    Json(ServerStatus {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
        watched_targets: state.pipeline.registry().len(),
    })
}

/// GET /health
pub async fn health(AxumState(state): AxumState<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "watched_targets": state.pipeline.registry().len(),
    }))
}

/// GET /targets - The registry as loaded at startup
pub async fn list_targets(AxumState(state): AxumState<SharedState>) -> Json<Value> {
    let targets: Vec<TargetSummary> = state
        .pipeline
        .registry()
        .targets()
        .iter()
        .map(|t| TargetSummary {
            path: t.local_path.display().to_string(),
            branch: t.branch.clone(),
            remote_url: t.remote_url.clone(),
            command: t.post_pull_command.clone(),
            command_timeout_secs: t.command_timeout.as_secs(),
            notify_on_success: t.notify_on_success,
        })
        .collect();

    Json(json!({
        "count": targets.len(),
        "targets": targets,
    }))
}
