use axum::Json;

use crate::models::submission::HealthResponse;

pub const SERVICE_NAME: &str = "herd-counter";

/// GET / and GET /health: fixed liveness record, no dependency checks.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
