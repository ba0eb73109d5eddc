pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Gateway routes with the standard middleware stack.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(health::health_check))
        .route("/health", get(health::health_check))
        .route("/submit-job", post(jobs::submit_job))
        .route("/jobs/{job_id}/status", get(jobs::get_job_status))
        .route("/jobs/{job_id}/result", get(jobs::get_job_result))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
