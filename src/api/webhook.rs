//! Webhook handler for GitHub push events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::queue::EnqueueError;
use crate::signature::verify_signature;
use crate::webhook::PushNotification;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Why a delivery was refused before any deployment work started.
#[derive(Debug, thiserror::Error)]
pub enum WebhookRejection {
    #[error("invalid or missing signature")]
    Unauthorized,
    #[error("invalid payload: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(#[from] EnqueueError),
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookRejection::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookRejection::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookRejection::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Handles the GitHub webhook POST request.
///
/// The deployment itself runs on the worker pool; the response only says whether the
/// delivery was accepted.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookRejection> {
    let signature = header(&headers, SIGNATURE_HEADER).unwrap_or_default();
    if !verify_signature(&body, signature, &state.webhook_secret) {
        warn!("Invalid webhook signature");
        return Err(WebhookRejection::Unauthorized);
    }

    // Only handle "push" events.
    let event = header(&headers, EVENT_HEADER);
    if event != Some("push") {
        info!("Not push event; Received {:?} event", event);
        return Ok(Json(json!({
            "status": "ignored",
            "event": event,
        })));
    }

    let push = PushNotification::from_slice(&body).map_err(|e| {
        info!("Could not parse push event: {}", e);
        WebhookRejection::BadRequest(e.to_string())
    })?;
    debug!(
        "Push to '{}' ref '{}' after {:?}",
        push.repository_name(),
        push.git_ref,
        push.after
    );

    let repository = push.repository_name().to_string();
    let branch = push.branch().to_string();
    let pusher = push.pusher_name().map(str::to_string);

    state.queue.enqueue(push).map_err(|e| {
        warn!(
            "Dropping push for '{}' branch '{}': {}",
            repository, branch, e
        );
        WebhookRejection::from(e)
    })?;

    info!(
        pusher = pusher.as_deref().unwrap_or("unknown"),
        "Accepted push for '{}' branch '{}'",
        repository,
        branch
    );
    Ok(Json(json!({
        "status": "accepted",
        "repository": repository,
        "branch": branch,
    })))
}
