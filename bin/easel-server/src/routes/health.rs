//! Liveness check. Needs no session and touches no store.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health), components(schemas(HealthResponse)))]
pub struct HealthApi;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving requests.
    pub status: String,
    pub version: String,
    /// Server clock in epoch milliseconds.
    pub timestamp: i64,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Report that the server is up, with its build version and clock.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_ok_with_version_and_clock() {
        let Json(body) = get_health().await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
        assert!(body.timestamp > 0);
    }

    #[test]
    fn serializes_flat_fields() {
        let body = serde_json::to_value(HealthResponse {
            status: "ok".into(),
            version: "1.2.3".into(),
            timestamp: 1_700_000_000_000,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "status": "ok", "version": "1.2.3", "timestamp": 1_700_000_000_000_i64 })
        );
    }
}
