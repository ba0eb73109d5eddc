use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use herd_counter::app_state::AppState;
use herd_counter::config::AppConfig;
use herd_counter::routes;
use herd_counter::services::queue::{DurableQueue, RedisQueue};
use herd_counter::services::storage::{ArtifactStore, S3ArtifactStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing herd-counter gateway");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_submitted_total", "Clips accepted and enqueued");
    metrics::describe_counter!(
        "jobs_rejected_total",
        "Submissions rejected by validation"
    );

    tracing::info!(bucket = %config.s3_bucket, "Initializing S3 artifact store");
    let store = S3ArtifactStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize S3 client");
    if let Err(e) = store.ensure_container(&config.input_container).await {
        tracing::warn!(error = %e, "Could not verify storage bucket, continuing");
    }

    tracing::info!(queue = %config.queue_name, "Connecting to Redis job queue");
    let queue = RedisQueue::new(&config.redis_url, &config.queue_name)
        .expect("Failed to initialize job queue");
    match queue.create_if_missing().await {
        Ok(true) => tracing::info!(queue = %config.queue_name, "Created job queue"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "Could not verify job queue, continuing"),
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(Arc::new(store), Arc::new(queue), config);
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting herd-counter gateway on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
