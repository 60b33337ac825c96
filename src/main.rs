use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use datacube_query_cache::{
    app_state::AppState,
    config::AppConfig,
    db::{self, pg_store::PgJobStore},
    models::catalog::Catalog,
    routes,
    services::{cache::JobFingerprintCache, queue::JobQueue},
};

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

    tracing::info!("Initializing datacube-query-cache server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job queue
    tracing::info!("Connecting to Redis job queue");
    let routes_table = config.routes().expect("Invalid QUEUE_ROUTES");
    let queue = JobQueue::new(&config.redis_url, routes_table, &config.task_name)
        .expect("Failed to initialize job queue");
    tracing::info!(
        task = %config.task_name,
        queue = %queue.submit_queue(),
        "Queries will be dispatched"
    );

    let catalog = config.catalog_path.as_ref().map(|path| {
        tracing::info!(path = %path.display(), "Loading satellite/area catalog");
        Catalog::load(path).expect("Failed to load catalog")
    });

    let mut cache = JobFingerprintCache::new(Arc::new(PgJobStore::new(db_pool)));
    if let Some(schema) = config.extension_schema() {
        cache = cache.with_schema(Arc::new(schema));
    }

    let state = AppState::new(cache, queue, catalog);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::submit_job))
        .route("/api/v1/jobs/{query_id}", get(routes::jobs::get_job_status))
        .route(
            "/api/v1/jobs/{query_id}/metadata",
            get(routes::jobs::get_job_metadata),
        )
        .route(
            "/api/v1/jobs/{query_id}/cancel",
            post(routes::jobs::cancel_job),
        )
        .route(
            "/api/v1/jobs/{query_id}/submissions/{user_id}",
            get(routes::jobs::get_submission),
        )
        .route(
            "/api/v1/users/{user_id}/jobs",
            get(routes::jobs::list_user_jobs),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting datacube-query-cache on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
