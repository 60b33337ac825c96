//! Worker side of the job lifecycle.
//!
//! A worker takes a queued job, claims it with `PENDING -> RUNNING`, lets a
//! [`JobHandler`] do the actual work and records the outcome. Deliveries
//! whose record is no longer `PENDING` (redelivery of a job some other worker
//! already claimed, or a cancelled job) are acknowledged and skipped. Only
//! jobs that were never claimed go back on the queue.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::models::job::{JobIdentity, JobRecord};
use crate::models::metadata::SceneStatistics;
use crate::services::cache::{CacheError, JobFingerprintCache};
use crate::services::queue::{JobQueue, QueueError, QueuedJob};

/// Does the computation for one query.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process `job`, reporting metadata and progress through `progress`.
    /// Returns the result location.
    async fn process(
        &self,
        job: &QueuedJob,
        progress: &ProgressReporter<'_>,
    ) -> Result<String, HandlerError>;
}

/// Handle given to a [`JobHandler`] for the job it is running.
pub struct ProgressReporter<'a> {
    cache: &'a JobFingerprintCache,
    query_id: &'a JobIdentity,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(cache: &'a JobFingerprintCache, query_id: &'a JobIdentity) -> Self {
        Self { cache, query_id }
    }

    pub fn query_id(&self) -> &JobIdentity {
        self.query_id
    }

    pub async fn metadata(&self, stats: SceneStatistics) -> Result<(), CacheError> {
        self.cache.record_metadata(self.query_id, stats).await
    }

    pub async fn progress(&self, scenes_processed: i32, total_scenes: i32) -> Result<(), CacheError> {
        self.cache
            .update_progress(self.query_id, scenes_processed, total_scenes)
            .await
    }
}

/// What happened to a delivered job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobRecord),
    Failed(JobRecord),
    /// The job was not in a state this worker may claim, or was cancelled
    /// or reclaimed while it ran.
    Skipped,
}

/// Attempts at recording a job's terminal status while the store is down.
const FINISH_ATTEMPTS: u32 = 4;
const FINISH_BACKOFF: Duration = Duration::from_millis(250);

/// Run the full lifecycle for one delivered job.
///
/// Once the job is claimed its record is always driven to a terminal status
/// if the store allows it at all; a handler that lost the store is recorded
/// as a failure. Only when the store stays unreachable is the claimed record
/// left `RUNNING`, for [`JobFingerprintCache::reclaim_stale`] to fail later.
pub async fn run_job(
    cache: &JobFingerprintCache,
    handler: &dyn JobHandler,
    job: &QueuedJob,
) -> Result<JobOutcome, RunError> {
    match cache.start(&job.query_id).await {
        Ok(_) => {}
        Err(CacheError::InvalidTransition { from, .. }) => {
            tracing::info!(query_id = %job.query_id, status = %from, "Job already claimed, skipping");
            return Ok(JobOutcome::Skipped);
        }
        Err(CacheError::UnknownIdentity(_)) => {
            tracing::warn!(query_id = %job.query_id, "No record for delivered job, skipping");
            return Ok(JobOutcome::Skipped);
        }
        Err(e) => return Err(RunError::Unclaimed(e)),
    }

    tracing::info!(query_id = %job.query_id, task = %job.task, "Processing query");
    let start = std::time::Instant::now();

    let query_id = &job.query_id;
    let progress = ProgressReporter::new(cache, query_id);
    let finished = match handler.process(job, &progress).await {
        Ok(result_location) => {
            let location = result_location.as_str();
            retry_while_unavailable(move || cache.complete(query_id, location))
                .await
                .map(JobOutcome::Completed)
        }
        Err(e) => {
            let reason = e.to_string();
            let reason = reason.as_str();
            retry_while_unavailable(move || cache.fail(query_id, reason))
                .await
                .map(JobOutcome::Failed)
        }
    };

    metrics::histogram!("query_processing_seconds").record(start.elapsed().as_secs_f64());

    match finished {
        Ok(outcome) => Ok(outcome),
        // Cancelled or reclaimed while the handler ran
        Err(CacheError::InvalidTransition { from, .. }) => {
            tracing::info!(query_id = %query_id, status = %from, "Job finished elsewhere");
            Ok(JobOutcome::Skipped)
        }
        Err(CacheError::UnknownIdentity(_)) => Ok(JobOutcome::Skipped),
        Err(e) => Err(RunError::Abandoned {
            query_id: query_id.clone(),
            source: e,
        }),
    }
}

async fn retry_while_unavailable<F, Fut>(mut op: F) -> Result<JobRecord, CacheError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobRecord, CacheError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(CacheError::StoreUnavailable(reason)) if attempt < FINISH_ATTEMPTS => {
                tracing::warn!(attempt, reason = %reason, "Store unavailable, retrying");
                sleep(FINISH_BACKOFF * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Take one job off `queue_name` and run it.
/// Returns Ok(true) if a job was taken, Ok(false) if the queue was empty.
pub async fn process_next(
    queue: &JobQueue,
    queue_name: &str,
    cache: &JobFingerprintCache,
    handler: &dyn JobHandler,
) -> Result<bool, WorkerError> {
    let Some(delivery) = queue.dequeue(queue_name).await? else {
        return Ok(false);
    };

    let result = run_job(cache, handler, &delivery.job).await;
    match &result {
        Ok(outcome) => {
            tracing::debug!(query_id = %delivery.job.query_id, ?outcome, "Delivery acknowledged");
        }
        Err(RunError::Unclaimed(e)) => {
            // Nothing was claimed, so a redelivery can still start the job
            tracing::error!(query_id = %delivery.job.query_id, error = %e, "Job not started, re-queueing");
            queue.push(&delivery.job).await?;
        }
        Err(RunError::Abandoned { .. }) => {
            tracing::error!(
                query_id = %delivery.job.query_id,
                "Job left RUNNING, the reclaim sweep will fail it"
            );
        }
    }

    queue.complete(&delivery).await?;
    result?;
    Ok(true)
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("No scenes found for product {product} between {start} and {end}")]
    NoData {
        product: String,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed scene manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The job could not be claimed; its record is untouched.
    #[error("Job could not be started: {0}")]
    Unclaimed(#[source] CacheError),

    /// The job was claimed but its outcome could not be recorded.
    #[error("Outcome of {query_id} could not be recorded: {source}")]
    Abandoned {
        query_id: JobIdentity,
        #[source]
        source: CacheError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Run(#[from] RunError),
}
