use std::net::SocketAddr;
use std::sync::Arc;

use herd_counter::{
    config::{AppConfig, CountingConfig},
    media::FfmpegCodec,
    services::{
        detector::WorkersAiDetector,
        queue::{DurableQueue, RedisQueue},
        storage::{ArtifactStore, S3ArtifactStore},
    },
    worker::{DispatchSettings, Dispatcher},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting herd-counter worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let counting = CountingConfig::from_env().expect("Invalid COUNTER_* configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus metrics exporter");
        tracing::info!(%addr, "Prometheus listener started");
    }

    metrics::describe_counter!("jobs_completed_total", "Jobs counted and published");
    metrics::describe_counter!(
        "jobs_failed_total",
        "Jobs aborted; their leases were left to expire"
    );
    metrics::describe_counter!("line_crossings_total", "Line crossings by direction");
    metrics::describe_histogram!(
        "job_processing_seconds",
        "Time from lease to published result"
    );

    // Initialize services
    tracing::info!("Initializing services");
    let store = S3ArtifactStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize S3 client");
    for container in [&config.input_container, &config.output_container] {
        if let Err(e) = store.ensure_container(container).await {
            tracing::warn!(container = %container, error = %e, "Could not verify storage, continuing");
        }
    }

    let queue = RedisQueue::new(&config.redis_url, &config.queue_name)
        .expect("Failed to initialize job queue");
    match queue.create_if_missing().await {
        Ok(true) => tracing::info!(queue = %config.queue_name, "Created job queue"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "Could not verify job queue, continuing"),
    }
    if let Ok(depth) = queue.ready_depth().await {
        tracing::info!(queue = %config.queue_name, depth, "Jobs waiting");
    }

    let account_id = config
        .cf_account_id
        .clone()
        .expect("CF_ACCOUNT_ID is required by the worker");
    let api_token = config
        .cf_api_token
        .clone()
        .expect("CF_API_TOKEN is required by the worker");
    let detector = WorkersAiDetector::new(account_id, api_token, config.detector_model.clone())
        .with_confidence_threshold(config.detector_confidence);

    let dispatcher = Dispatcher::new(
        Arc::new(store),
        Arc::new(queue),
        Arc::new(detector),
        Arc::new(FfmpegCodec::new()),
        counting,
        DispatchSettings::from_config(&config),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, finishing current job");
        let _ = stop_tx.send(true);
    });

    tracing::info!("Worker ready, starting job processing loop");
    dispatcher.run(stop_rx).await;
}

/// Resolves on SIGINT (ctrl-c) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
