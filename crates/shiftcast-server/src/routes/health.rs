//! Liveness endpoint.

use axum::response::IntoResponse;
use serde_json::json;

/// GET /health -- liveness probe.
pub async fn health_check() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok" }))
}
