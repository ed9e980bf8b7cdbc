//! Email provider webhook
//!
//! Not tenant-scoped by header: each event names its own team.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::{ApiError, ApiResult, AppState};
use ahub_common::db::email_events::{self, Recorded};
use ahub_common::db::now;
use ahub_common::models::IncomingEmailEvent;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

/// One event or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Batch(Vec<IncomingEmailEvent>),
    Single(Box<IncomingEmailEvent>),
}

impl EventPayload {
    pub fn into_events(self) -> Vec<IncomingEmailEvent> {
        match self {
            EventPayload::Batch(events) => events,
            EventPayload::Single(event) => vec![*event],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub accepted: usize,
    pub duplicates: usize,
}

/// Check `sha256=<hex>` against the HMAC-SHA256 of the raw body
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), ApiError> {
    let header = header.ok_or_else(|| ApiError::Unauthorized("Missing webhook signature".to_string()))?;
    let hex_digest = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| ApiError::Unauthorized("Signature must be sha256=<hex>".to_string()))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_| ApiError::Unauthorized("Signature is not hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ApiError::Unauthorized("Webhook signature mismatch".to_string()))
}

/// POST /webhooks/email-events
pub async fn receive_email_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    if let Some(secret) = state
        .config
        .webhooks
        .signing_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if let Err(e) = verify_signature(secret, &body, header) {
            warn!(error = %e, "Rejected email event webhook");
            return Err(e);
        }
    }

    let payload: EventPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid event payload: {}", e)))?;
    let events = payload.into_events();
    if events.is_empty() {
        return Err(ApiError::BadRequest("No events in payload".to_string()));
    }

    // validate the whole batch before storing any of it
    for event in &events {
        email_events::check_event(&state.db, event).await?;
    }

    let received_at = now();
    let mut response = WebhookResponse {
        accepted: 0,
        duplicates: 0,
    };
    for event in &events {
        match email_events::record_event(&state.db, event, received_at).await? {
            Recorded::Stored => response.accepted += 1,
            Recorded::Duplicate => {
                debug!(provider_id = ?event.provider_id, "Duplicate email event ignored");
                response.duplicates += 1;
            }
        }
    }

    info!(
        accepted = response.accepted,
        duplicates = response.duplicates,
        "Email events received"
    );
    Ok(Json(response))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/email-events", post(receive_email_events))
}
