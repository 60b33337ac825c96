use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use datacube_query_cache::{
    config::AppConfig,
    db::{self, pg_store::PgJobStore},
    routes,
    services::{
        cache::JobFingerprintCache,
        manifest::ManifestHandler,
        queue::JobQueue,
        worker::{self, WorkerError},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::{interval, sleep};
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

    tracing::info!("Starting query worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Completion, failure and timing metrics are recorded here, not in the API
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    routes::metrics::describe();
    tracing::info!(addr = %metrics_addr, "Serving worker metrics");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config)
        .await
        .expect("Failed to connect to database");

    let cache = Arc::new(JobFingerprintCache::new(Arc::new(PgJobStore::new(db_pool))));

    // Fail records left RUNNING by workers that lost the store or died
    let stale_after = chrono::Duration::seconds(config.stale_job_timeout_secs as i64);
    let sweep_cache = cache.clone();
    let mut sweep = interval(Duration::from_secs(config.reclaim_interval_secs.max(1)));
    tokio::spawn(async move {
        loop {
            sweep.tick().await;
            match sweep_cache.reclaim_stale(stale_after).await {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::warn!(count = reclaimed.len(), "Reclaimed abandoned queries");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Reclaim sweep failed"),
            }
        }
    });

    let queue = JobQueue::new(
        &config.redis_url,
        config.routes().expect("Invalid QUEUE_ROUTES"),
        &config.task_name,
    )
    .expect("Failed to initialize job queue");
    let queue_name = queue.submit_queue().to_string();

    let handler = ManifestHandler::new(&config.scene_manifest_dir, &config.result_dir);
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);

    tracing::info!(queue = %queue_name, "Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match worker::process_next(&queue, &queue_name, &cache, &handler).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(WorkerError::Queue(e)) => {
                tracing::error!(error = %e, "Queue unavailable, will retry");
                sleep(poll_interval).await;
            }
            Err(WorkerError::Run(e)) => {
                tracing::error!(error = %e, "Job lifecycle error, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}
