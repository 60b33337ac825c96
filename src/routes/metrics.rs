use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the metrics the service records. Both the API
/// and the worker call this; each exports the series it records itself
/// (submissions and cache hits from the API, outcomes and timing from the
/// worker).
pub fn describe() {
    metrics::describe_counter!("query_jobs_submitted_total", "Queries dispatched for computation");
    metrics::describe_counter!(
        "query_cache_hits_total",
        "Submissions answered from an existing record"
    );
    metrics::describe_counter!("query_jobs_completed_total", "Queries that reached DONE");
    metrics::describe_counter!("query_jobs_failed_total", "Queries that reached ERROR");
    metrics::describe_counter!(
        "query_jobs_reclaimed_total",
        "RUNNING queries failed after their worker stopped reporting"
    );
    metrics::describe_gauge!("query_queue_depth", "Jobs waiting on the submit queue");
    metrics::describe_histogram!(
        "query_processing_seconds",
        "Time from claiming a query to its terminal status"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
