//! Inbound webhook: authentication, payload classification and dispatch.

use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Json},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use voxbridge_types::{CallId, EndpointId, SessionDescription};

const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";
const DEFAULT_ENDPOINT_ID: &str = "mock_phone_id";

/// A classified webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    CallInitiated(CallInitiation),
    Message,
    Status,
    /// A business-account payload with no recognised change.
    Other,
    NoEntries,
    /// Not a business-account payload at all.
    Unknown,
}

/// The fields of an incoming call offer.
#[derive(Debug, Clone, PartialEq)]
pub struct CallInitiation {
    pub call_id: CallId,
    pub offer: SessionDescription,
    pub endpoint_id: EndpointId,
    pub from: String,
    pub timestamp: Option<String>,
}

impl WebhookEvent {
    /// The `type` reported back to the provider.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::CallInitiated(_) => "call.initiated",
            WebhookEvent::Message => "message",
            WebhookEvent::Status => "status",
            WebhookEvent::Other => "other",
            WebhookEvent::NoEntries => "no_entries",
            WebhookEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook token missing or invalid")]
    Unauthorized,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebhookError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            WebhookError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "Invalid JSON payload"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Accepts `Bearer <secret>` or the bare secret. An unset secret accepts nothing.
pub fn verify_token(auth_header: Option<&str>, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(header) = auth_header else {
        return false;
    };
    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    token == secret
}

/// Classifies a webhook payload by the first change that carries a call
/// offer, messages or statuses.
pub fn classify_payload(payload: &Value) -> WebhookEvent {
    if payload.get("object").and_then(Value::as_str) != Some(BUSINESS_ACCOUNT_OBJECT) {
        return WebhookEvent::Unknown;
    }

    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if entries.is_empty() {
        return WebhookEvent::NoEntries;
    }

    let changes = entries
        .iter()
        .filter_map(|entry| entry.get("changes").and_then(Value::as_array))
        .flatten();
    for change in changes {
        let Some(value) = change.get("value") else {
            continue;
        };

        if let Some(initiation) = call_initiation(value) {
            return WebhookEvent::CallInitiated(initiation);
        }
        if value.get("messages").is_some() {
            return WebhookEvent::Message;
        }
        if value.get("statuses").is_some() {
            return WebhookEvent::Status;
        }
    }

    WebhookEvent::Other
}

fn call_initiation(value: &Value) -> Option<CallInitiation> {
    let call_id = value.get("call_id").and_then(Value::as_str)?;
    let sdp = value.get("sdp").and_then(Value::as_str)?;
    let text = |key: &str| value.get(key).and_then(Value::as_str);

    Some(CallInitiation {
        call_id: CallId::new(call_id),
        offer: SessionDescription::new(sdp),
        endpoint_id: EndpointId::new(text("phone_number_id").unwrap_or(DEFAULT_ENDPOINT_ID)),
        from: text("from").unwrap_or("unknown").to_string(),
        timestamp: value.get("timestamp").map(|ts| match ts {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    })
}

/// Handler for `POST /webhook`.
pub async fn webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !verify_token(auth_header, &state.webhook_secret) {
        tracing::warn!("rejected webhook with invalid authentication token");
        return Err(WebhookError::Unauthorized);
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "rejected webhook with invalid JSON");
        WebhookError::from(e)
    })?;

    let event = classify_payload(&payload);
    tracing::info!(event_type = event.kind(), "webhook event received");

    let response = match event {
        WebhookEvent::CallInitiated(call) => {
            tracing::info!(
                call_id = %call.call_id,
                endpoint_id = %call.endpoint_id,
                from = %call.from,
                timestamp = call.timestamp.as_deref().unwrap_or("<none>"),
                "incoming call"
            );
            let call_id = call.call_id.clone();
            state
                .registry
                .handle_new_call(call.call_id, call.offer, call.endpoint_id)
                .await;

            json!({
                "status": "success",
                "message": "Call initiation processed",
                "call_id": call_id,
            })
        }
        other => json!({
            "status": "acknowledged",
            "type": other.kind(),
        }),
    };

    Ok(Json(response))
}
