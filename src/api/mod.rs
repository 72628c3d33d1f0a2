//! HTTP surface: the webhook receiver plus a few read-only status routes

pub mod status;
pub mod webhook;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::SharedState;

pub use status::{health, list_targets, status};
pub use webhook::{WebhookRejection, handle_webhook};

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/webhook",
            post(handle_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY)),
        )
        .route("/health", get(health))
        .route("/targets", get(list_targets))
        .route("/", get(status))
        .with_state(state)
}
