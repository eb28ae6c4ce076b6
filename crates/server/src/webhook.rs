//! Wazzup webhook intake. Every inbound message is buffered under its chat id and
//! the chat's drain job is pushed back by the debounce window.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use treejar_core::{ApplicationError, InterfaceError};
use treejar_integrations::providers::WazzupWebhook;
use treejar_integrations::EventDebouncer;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct WebhookState {
    debouncer: Arc<EventDebouncer>,
    secret: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    correlation_id: String,
}

/// Interface error rendered as a JSON response.
pub struct WebhookError(InterfaceError);

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(debouncer: Arc<EventDebouncer>, secret: Option<SecretString>) -> Router {
    Router::new()
        .route("/api/v1/webhook/wazzup", post(wazzup_webhook))
        .with_state(WebhookState { debouncer, secret })
}

async fn wazzup_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let fail = |error: ApplicationError| WebhookError(error.into_interface(correlation_id.clone()));

    if let Some(secret) = &state.secret {
        let provided = headers.get(WEBHOOK_SECRET_HEADER).and_then(|value| value.to_str().ok());
        if !provided.is_some_and(|value| secrets_match(value, secret.expose_secret())) {
            warn!(
                event_name = "ingress.webhook.unauthorized",
                correlation_id = %correlation_id,
                header_present = provided.is_some(),
                "webhook secret missing or invalid"
            );
            return Err(fail(ApplicationError::Unauthorized("invalid webhook secret".to_string())));
        }
    }

    let payload: WazzupWebhook = serde_json::from_slice(&body).map_err(|error| {
        fail(ApplicationError::Validation(format!("invalid webhook payload: {error}")))
    })?;

    for message in &payload.messages {
        let event = message.to_buffered_event().map_err(|error| {
            fail(ApplicationError::Validation(format!("unencodable message: {error}")))
        })?;
        state
            .debouncer
            .on_event(&message.group_key(), &event)
            .await
            .map_err(|error| fail(ApplicationError::from(error)))?;
    }

    info!(
        event_name = "ingress.webhook.accepted",
        correlation_id = %correlation_id,
        message_count = payload.messages.len(),
        "wazzup webhook accepted"
    );
    Ok(Json(json!({ "ok": true })))
}

/// Compares fixed-length digests so the check time does not depend on where the
/// strings first differ.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided.iter().zip(expected.iter()).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}
