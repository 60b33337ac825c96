//! Query result cache.
//!
//! Every query is reduced to a [`JobIdentity`]. The first submission of an
//! identity creates a `PENDING` record and dispatches the computation; every
//! later submission gets the existing record back, whatever its status, and
//! dispatches nothing. The worker that owns the job then drives it through
//! `PENDING -> RUNNING -> {DONE, ERROR}`.

use std::sync::Arc;

use garde::Validate;

use crate::models::job::{JobIdentity, JobRecord, JobStatus};
use crate::models::metadata::{JobMetadata, SceneStatistics};
use crate::models::params::JobParameters;
use crate::models::submission::{QuerySubmission, Submitter};
use crate::services::dispatcher::{DispatchError, WorkDispatcher};
use crate::services::extensions::ExtensionSchema;
use crate::services::fingerprint::{self, FingerprintError};
use crate::services::store::{Conditional, InsertOutcome, JobStore, StoreError, Transition};

/// Reason recorded when a job is cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// Reason recorded when the reclaim sweep fails an abandoned job.
pub const ABANDONED_REASON: &str = "worker stopped reporting progress";

pub struct JobFingerprintCache {
    store: Arc<dyn JobStore>,
    schema: Option<Arc<dyn ExtensionSchema>>,
}

impl JobFingerprintCache {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            schema: None,
        }
    }

    /// Validate extra parameters with an application schema.
    pub fn with_schema(mut self, schema: Arc<dyn ExtensionSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Identity of a query. Pure; rejects parameters that could collide.
    pub fn compute_identity(&self, params: &JobParameters) -> Result<JobIdentity, CacheError> {
        Ok(fingerprint::compute_identity(params)?)
    }

    /// Point-in-time read of a record. `None` is a cache miss.
    pub async fn lookup(&self, query_id: &JobIdentity) -> Result<Option<JobRecord>, CacheError> {
        Ok(self.store.get(query_id).await?)
    }

    /// Get-or-create: returns the existing record for these parameters, or
    /// creates a pending one and dispatches it exactly once.
    pub async fn submit(
        &self,
        params: &JobParameters,
        dispatcher: &dyn WorkDispatcher,
    ) -> Result<JobRecord, CacheError> {
        self.check_params(params)?;
        let query_id = self.compute_identity(params)?;

        let candidate = JobRecord::pending(query_id.clone(), params.bounds(), params.extra.clone());
        let record = match self.store.insert_if_absent(candidate).await? {
            InsertOutcome::Existing(existing) => {
                metrics::counter!("query_cache_hits_total").increment(1);
                tracing::debug!(
                    query_id = %query_id,
                    status = %existing.status,
                    "Query already known, returning cached record"
                );
                return Ok(existing);
            }
            InsertOutcome::Created(created) => created,
        };

        if let Err(e) = dispatcher.enqueue(&query_id, params).await {
            tracing::error!(query_id = %query_id, error = %e, "Dispatch failed, rolling back record");
            // Leave no orphaned PENDING record behind so a later submit can retry
            if let Err(rollback) = self.store.remove_pending(&query_id).await {
                tracing::error!(
                    query_id = %query_id,
                    error = %rollback,
                    "Failed to roll back undispatched record"
                );
            }
            return Err(CacheError::DispatchFailed(e));
        }

        metrics::counter!("query_jobs_submitted_total").increment(1);
        tracing::info!(query_id = %query_id, "Query submitted");
        Ok(record)
    }

    /// [`Self::submit`] on behalf of a user, also recording the user's
    /// submission. Cache hits are recorded too, so every user who asked for
    /// a query finds it in their history.
    pub async fn submit_for(
        &self,
        params: &JobParameters,
        submitter: &Submitter,
        dispatcher: &dyn WorkDispatcher,
    ) -> Result<(JobRecord, QuerySubmission), CacheError> {
        submitter
            .validate()
            .map_err(|e| CacheError::InvalidParameter(e.to_string()))?;

        let record = self.submit(params, dispatcher).await?;
        let submission = self
            .store
            .record_submission(QuerySubmission::new(record.query_id.clone(), submitter))
            .await?;

        tracing::debug!(
            query_id = %record.query_id,
            user_id = %submission.user_id,
            "Submission recorded"
        );
        Ok((record, submission))
    }

    /// A user's submission of a query, if they made one.
    pub async fn submission(
        &self,
        query_id: &JobIdentity,
        user_id: &str,
    ) -> Result<Option<QuerySubmission>, CacheError> {
        Ok(self.store.get_submission(query_id, user_id).await?)
    }

    /// Every query a user has submitted, newest first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<QuerySubmission>, CacheError> {
        Ok(self.store.list_submissions(user_id).await?)
    }

    /// `PENDING -> RUNNING`, called by the worker that picked the job up.
    pub async fn start(&self, query_id: &JobIdentity) -> Result<JobRecord, CacheError> {
        self.apply(query_id, Transition::new(JobStatus::Pending, JobStatus::Running))
            .await
    }

    pub async fn update_progress(
        &self,
        query_id: &JobIdentity,
        scenes_processed: i32,
        total_scenes: i32,
    ) -> Result<(), CacheError> {
        if scenes_processed < 0 || total_scenes < 0 || scenes_processed > total_scenes {
            return Err(CacheError::InvalidParameter(format!(
                "progress {scenes_processed}/{total_scenes} is out of range"
            )));
        }

        let outcome = self
            .store
            .update_progress(query_id, scenes_processed, total_scenes)
            .await?;
        expect_applied(query_id, outcome, JobStatus::Running, JobStatus::Running)?;

        tracing::debug!(
            query_id = %query_id,
            scenes_processed,
            total_scenes,
            "Progress updated"
        );
        Ok(())
    }

    /// `RUNNING -> DONE` with the location of the result.
    pub async fn complete(
        &self,
        query_id: &JobIdentity,
        result_location: &str,
    ) -> Result<JobRecord, CacheError> {
        let mut transition = Transition::new(JobStatus::Running, JobStatus::Done);
        transition.result_location = Some(result_location.to_string());
        let record = self.apply(query_id, transition).await?;

        metrics::counter!("query_jobs_completed_total").increment(1);
        tracing::info!(query_id = %query_id, result_location, "Query completed");
        Ok(record)
    }

    /// `RUNNING -> ERROR` with a reason.
    pub async fn fail(&self, query_id: &JobIdentity, reason: &str) -> Result<JobRecord, CacheError> {
        let mut transition = Transition::new(JobStatus::Running, JobStatus::Error);
        transition.error = Some(reason.to_string());
        let record = self.apply(query_id, transition).await?;

        metrics::counter!("query_jobs_failed_total").increment(1);
        tracing::warn!(query_id = %query_id, reason, "Query failed");
        Ok(record)
    }

    /// `PENDING | RUNNING -> ERROR` with [`CANCELLED_REASON`]. A cancelled
    /// pending job is skipped by the worker that later receives it.
    pub async fn cancel(&self, query_id: &JobIdentity) -> Result<JobRecord, CacheError> {
        for from in [JobStatus::Running, JobStatus::Pending] {
            let mut transition = Transition::new(from, JobStatus::Error);
            transition.error = Some(CANCELLED_REASON.to_string());

            match self.apply(query_id, transition).await {
                Ok(record) => {
                    metrics::counter!("query_jobs_failed_total").increment(1);
                    tracing::info!(query_id = %query_id, from = %from, "Query cancelled");
                    return Ok(record);
                }
                // Raced with a claim or was already pending; try the other state
                Err(CacheError::InvalidTransition { from: actual, .. })
                    if !actual.is_terminal() => {}
                Err(e) => return Err(e),
            }
        }

        // Flipped between PENDING and RUNNING twice; report what it is now
        let current = self
            .store
            .get(query_id)
            .await?
            .ok_or_else(|| CacheError::UnknownIdentity(query_id.clone()))?;
        Err(CacheError::InvalidTransition {
            query_id: query_id.clone(),
            from: current.status,
            to: JobStatus::Error,
        })
    }

    /// Fail every `RUNNING` record nobody has touched for `max_age`. A
    /// worker that lost the store mid-run leaves such records behind.
    pub async fn reclaim_stale(
        &self,
        max_age: chrono::Duration,
    ) -> Result<Vec<JobRecord>, CacheError> {
        let cutoff = chrono::Utc::now() - max_age;
        let reclaimed = self
            .store
            .fail_stale_running(cutoff, ABANDONED_REASON)
            .await?;

        if !reclaimed.is_empty() {
            metrics::counter!("query_jobs_failed_total").increment(reclaimed.len() as u64);
            metrics::counter!("query_jobs_reclaimed_total").increment(reclaimed.len() as u64);
            for record in &reclaimed {
                tracing::warn!(query_id = %record.query_id, "Abandoned query failed");
            }
        }
        Ok(reclaimed)
    }

    /// Store scene statistics for a query. Allowed once per identity.
    pub async fn record_metadata(
        &self,
        query_id: &JobIdentity,
        stats: SceneStatistics,
    ) -> Result<(), CacheError> {
        if !stats.is_well_shaped() {
            return Err(CacheError::MetadataShape {
                acquisitions: stats.acquisitions.len(),
                clean_pixel_counts: stats.clean_pixel_counts.len(),
                clean_pixel_percentages: stats.clean_pixel_percentages.len(),
            });
        }

        let Some(record) = self.store.get(query_id).await? else {
            return Err(CacheError::UnknownIdentity(query_id.clone()));
        };

        let scene_count = stats.scene_count;
        if !self
            .store
            .insert_metadata(stats.into_metadata(query_id.clone(), record.bounds))
            .await?
        {
            return Err(CacheError::DuplicateMetadata(query_id.clone()));
        }

        tracing::debug!(query_id = %query_id, scene_count, "Metadata recorded");
        Ok(())
    }

    pub async fn metadata(&self, query_id: &JobIdentity) -> Result<Option<JobMetadata>, CacheError> {
        Ok(self.store.get_metadata(query_id).await?)
    }

    fn check_params(&self, params: &JobParameters) -> Result<(), CacheError> {
        params
            .validate()
            .map_err(|e| CacheError::InvalidParameter(e.to_string()))?;

        if params.time_start > params.time_end {
            return Err(CacheError::InvalidParameter(
                "time_start must not be after time_end".to_string(),
            ));
        }
        if params.latitude_min > params.latitude_max {
            return Err(CacheError::InvalidParameter(
                "latitude_min must not exceed latitude_max".to_string(),
            ));
        }
        if params.longitude_min > params.longitude_max {
            return Err(CacheError::InvalidParameter(
                "longitude_min must not exceed longitude_max".to_string(),
            ));
        }

        if let Some(schema) = &self.schema {
            schema
                .validate(&params.extra)
                .map_err(CacheError::InvalidParameter)?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        query_id: &JobIdentity,
        transition: Transition,
    ) -> Result<JobRecord, CacheError> {
        let (from, to) = (transition.from, transition.to);
        if !from.can_transition_to(to) {
            return Err(CacheError::InvalidTransition {
                query_id: query_id.clone(),
                from,
                to,
            });
        }
        let outcome = self.store.transition(query_id, transition).await?;
        expect_applied(query_id, outcome, from, to)
    }
}

fn expect_applied(
    query_id: &JobIdentity,
    outcome: Conditional,
    expected: JobStatus,
    to: JobStatus,
) -> Result<JobRecord, CacheError> {
    match outcome {
        Conditional::Applied(record) => Ok(record),
        Conditional::Missing => Err(CacheError::UnknownIdentity(query_id.clone())),
        Conditional::StatusMismatch(actual) => {
            tracing::debug!(
                query_id = %query_id,
                expected = %expected,
                actual = %actual,
                "Rejected status change"
            );
            Err(CacheError::InvalidTransition {
                query_id: query_id.clone(),
                from: actual,
                to,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid query parameters: {0}")]
    InvalidParameter(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unknown query {0}")]
    UnknownIdentity(JobIdentity),

    #[error("Query {query_id} cannot move from {from} to {to}")]
    InvalidTransition {
        query_id: JobIdentity,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(
        "Metadata sequences differ in length: {acquisitions} acquisitions, \
         {clean_pixel_counts} clean pixel counts, {clean_pixel_percentages} percentages"
    )]
    MetadataShape {
        acquisitions: usize,
        clean_pixel_counts: usize,
        clean_pixel_percentages: usize,
    },

    #[error("Metadata already recorded for query {0}")]
    DuplicateMetadata(JobIdentity),

    #[error("Failed to dispatch query: {0}")]
    DispatchFailed(#[source] DispatchError),

    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(reason) => CacheError::StoreUnavailable(reason),
            other => CacheError::Store(other),
        }
    }
}

impl From<FingerprintError> for CacheError {
    fn from(e: FingerprintError) -> Self {
        CacheError::InvalidParameter(e.to_string())
    }
}
