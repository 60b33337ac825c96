use serde::Deserialize;
use std::path::PathBuf;

use crate::services::extensions::FieldSchema;
use crate::services::queue::{QueueRoutes, RouteParseError};

/// Process configuration, loaded once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queues
    pub redis_url: String,

    /// Task that submitted queries are dispatched as
    #[serde(default = "default_task_name")]
    pub task_name: String,

    /// Task routing table, `task:queue` pairs separated by commas.
    /// Unset means the built-in chunk processing routes.
    #[serde(default)]
    pub queue_routes: Option<String>,

    /// Queue for tasks without a route
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// Extra parameter names the application accepts, comma separated.
    /// Unset means any delimiter-safe extras are accepted.
    #[serde(default)]
    pub extra_parameters: Option<String>,

    /// Optional JSON catalog of satellites and areas used to validate queries
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Directory holding `<product>.json` scene manifests (worker only)
    #[serde(default = "default_scene_manifest_dir")]
    pub scene_manifest_dir: PathBuf,

    /// Directory results are written to (worker only)
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Address the worker serves its Prometheus metrics on
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// RUNNING records untouched for this long are failed by the reclaim sweep
    #[serde(default = "default_stale_job_timeout_secs")]
    pub stale_job_timeout_secs: u64,

    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_task_name() -> String {
    "generate_chunk".to_string()
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_scene_manifest_dir() -> PathBuf {
    PathBuf::from("./scenes")
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_stale_job_timeout_secs() -> u64 {
    3600
}

fn default_reclaim_interval_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Routing table built from `queue_routes`, or the default one.
    pub fn routes(&self) -> Result<QueueRoutes, RouteParseError> {
        let routes = match &self.queue_routes {
            Some(raw) => QueueRoutes::parse(raw, &self.default_queue)?,
            None => QueueRoutes::chunk_processing(&self.default_queue),
        };
        Ok(routes)
    }

    /// Schema for extra parameters, if the application restricts them.
    pub fn extension_schema(&self) -> Option<FieldSchema> {
        self.extra_parameters.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .fold(FieldSchema::new(), |schema, key| schema.optional(key))
        })
    }
}
