use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use treejar_cache::SharedCache;

#[derive(Clone)]
pub struct HealthState {
    cache: Arc<dyn SharedCache>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub cache: HealthCheck,
    pub checked_at: String,
}

pub fn router(cache: Arc<dyn SharedCache>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { cache })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let cache = cache_check(state.cache.as_ref()).await;
    let ready = cache.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "treejar-server runtime initialized".to_string(),
        },
        cache,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn cache_check(cache: &dyn SharedCache) -> HealthCheck {
    match cache.ping().await {
        Ok(()) => HealthCheck { status: "ready", detail: "shared cache ping succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("shared cache ping failed: {error}") }
        }
    }
}
