use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::models::job::JobIdentity;
use crate::models::params::JobParameters;
use crate::services::dispatcher::{DispatchError, WorkDispatcher};

const KEY_PREFIX: &str = "datacube:queue";

/// Chunk tasks that run on the worker nodes rather than on the master.
const CHUNK_TASKS: &[&str] = &[
    "generate_mosaic_chunk",
    "generate_water_chunk",
    "generate_tsm_chunk",
    "generate_fractional_cover_chunk",
    "generate_slip_chunk",
    "generate_coastal_change_chunk",
    "generate_ndvi_anomaly_chunk",
    "generate_chunk",
];
const CHUNK_QUEUE: &str = "chunk_processing";

/// Job payload serialized into Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub query_id: JobIdentity,
    pub task: String,
    pub params: JobParameters,
    pub enqueued_at: DateTime<Utc>,
}

/// A job taken off a queue, kept with its raw payload so it can be
/// acknowledged exactly as it was stored.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: QueuedJob,
    pub queue: String,
    payload: String,
}

/// Maps task names to queue names.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRoutes {
    routes: HashMap<String, String>,
    default_queue: String,
}

impl QueueRoutes {
    pub fn new(default_queue: &str) -> Self {
        Self {
            routes: HashMap::new(),
            default_queue: default_queue.to_string(),
        }
    }

    /// Every chunk task routed to `chunk_processing`.
    pub fn chunk_processing(default_queue: &str) -> Self {
        let mut routes = Self::new(default_queue);
        for task in CHUNK_TASKS {
            routes.route(task, CHUNK_QUEUE);
        }
        routes
    }

    /// Parse `task:queue,task:queue`. Blank entries are ignored.
    pub fn parse(raw: &str, default_queue: &str) -> Result<Self, RouteParseError> {
        let mut routes = Self::new(default_queue);
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (task, queue) = entry
                .split_once(':')
                .map(|(t, q)| (t.trim(), q.trim()))
                .filter(|(t, q)| !t.is_empty() && !q.is_empty())
                .ok_or_else(|| RouteParseError(entry.to_string()))?;
            routes.route(task, queue);
        }
        Ok(routes)
    }

    pub fn route(&mut self, task: &str, queue: &str) {
        self.routes.insert(task.to_string(), queue.to_string());
    }

    pub fn queue_for(&self, task: &str) -> &str {
        self.routes
            .get(task)
            .map(String::as_str)
            .unwrap_or(&self.default_queue)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid queue route {0:?}, expected task:queue")]
pub struct RouteParseError(pub String);

fn queue_key(queue: &str) -> String {
    format!("{KEY_PREFIX}:{queue}")
}

fn processing_key(queue: &str) -> String {
    format!("{KEY_PREFIX}:{queue}:processing")
}

/// Redis-backed job queues, one list per queue name.
pub struct JobQueue {
    client: redis::Client,
    routes: QueueRoutes,
    task_name: String,
}

impl JobQueue {
    pub fn new(redis_url: &str, routes: QueueRoutes, task_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            routes,
            task_name: task_name.to_string(),
        })
    }

    /// Queue that jobs submitted through this instance land on.
    pub fn submit_queue(&self) -> &str {
        self.routes.queue_for(&self.task_name)
    }

    /// Push a job onto the queue its task is routed to.
    pub async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        let key = queue_key(self.routes.queue_for(&job.task));
        conn.lpush::<_, _, ()>(&key, &payload).await?;
        Ok(())
    }

    /// Take the oldest job from `queue`, moving it to the processing list.
    pub async fn dequeue(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn
            .rpoplpush(queue_key(queue), processing_key(queue))
            .await?;

        match result {
            Some(payload) => {
                let job: QueuedJob = serde_json::from_str(&payload)?;
                Ok(Some(Delivery {
                    job,
                    queue: queue.to_string(),
                    payload,
                }))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge a delivery (remove it from the processing list).
    pub async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(processing_key(&delivery.queue), 1, &delivery.payload)
            .await?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Number of jobs waiting on `queue`.
    pub async fn queue_depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(queue_key(queue)).await?;
        Ok(depth)
    }
}

#[async_trait]
impl WorkDispatcher for JobQueue {
    async fn enqueue(
        &self,
        query_id: &JobIdentity,
        params: &JobParameters,
    ) -> Result<(), DispatchError> {
        let job = QueuedJob {
            query_id: query_id.clone(),
            task: self.task_name.clone(),
            params: params.clone(),
            enqueued_at: Utc::now(),
        };
        self.push(&job).await?;

        tracing::debug!(
            query_id = %query_id,
            task = %self.task_name,
            queue = %self.submit_queue(),
            "Query dispatched"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
