use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::queries;
use crate::models::job::{JobIdentity, JobRecord};
use crate::models::metadata::JobMetadata;
use crate::models::submission::QuerySubmission;
use crate::services::store::{Conditional, InsertOutcome, JobStore, StoreError, Transition};

/// Attempts at insert-then-read before giving up when a concurrent purge
/// keeps removing the conflicting row.
const INSERT_ATTEMPTS: usize = 3;

/// PostgreSQL-backed store. Atomicity comes from the unique constraint on
/// `query_id` and from status-guarded `UPDATE`s.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Tell a missed conditional update apart: no row, or wrong status.
    async fn explain_miss(&self, query_id: &JobIdentity) -> Result<Conditional, StoreError> {
        Ok(match queries::get_status(&self.pool, query_id).await? {
            Some(status) => Conditional::StatusMismatch(status),
            None => Conditional::Missing,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, query_id: &JobIdentity) -> Result<Option<JobRecord>, StoreError> {
        queries::get_record(&self.pool, query_id).await
    }

    async fn insert_if_absent(&self, record: JobRecord) -> Result<InsertOutcome, StoreError> {
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(created) = queries::insert_record_if_absent(&self.pool, &record).await? {
                return Ok(InsertOutcome::Created(created));
            }
            // Conflict: the existing row may vanish if it was rolled back in between
            if let Some(existing) = queries::get_record(&self.pool, &record.query_id).await? {
                return Ok(InsertOutcome::Existing(existing));
            }
        }

        Err(StoreError::Corrupt {
            query_id: record.query_id.to_string(),
            reason: "record kept disappearing during insert".to_string(),
        })
    }

    async fn transition(
        &self,
        query_id: &JobIdentity,
        transition: Transition,
    ) -> Result<Conditional, StoreError> {
        match queries::transition_record(&self.pool, query_id, &transition).await? {
            Some(record) => Ok(Conditional::Applied(record)),
            None => self.explain_miss(query_id).await,
        }
    }

    async fn update_progress(
        &self,
        query_id: &JobIdentity,
        scenes_processed: i32,
        total_scenes: i32,
    ) -> Result<Conditional, StoreError> {
        match queries::update_progress(&self.pool, query_id, scenes_processed, total_scenes).await?
        {
            Some(record) => Ok(Conditional::Applied(record)),
            None => self.explain_miss(query_id).await,
        }
    }

    async fn remove_pending(&self, query_id: &JobIdentity) -> Result<bool, StoreError> {
        queries::delete_pending(&self.pool, query_id).await
    }

    async fn insert_metadata(&self, metadata: JobMetadata) -> Result<bool, StoreError> {
        queries::insert_metadata(&self.pool, &metadata).await
    }

    async fn get_metadata(
        &self,
        query_id: &JobIdentity,
    ) -> Result<Option<JobMetadata>, StoreError> {
        queries::get_metadata(&self.pool, query_id).await
    }

    async fn fail_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, StoreError> {
        queries::fail_stale_running(&self.pool, cutoff, reason).await
    }

    async fn record_submission(
        &self,
        submission: QuerySubmission,
    ) -> Result<QuerySubmission, StoreError> {
        queries::upsert_submission(&self.pool, &submission).await?;
        queries::get_submission(&self.pool, &submission.query_id, &submission.user_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                query_id: submission.query_id.to_string(),
                reason: "submission vanished after insert".to_string(),
            })
    }

    async fn get_submission(
        &self,
        query_id: &JobIdentity,
        user_id: &str,
    ) -> Result<Option<QuerySubmission>, StoreError> {
        queries::get_submission(&self.pool, query_id, user_id).await
    }

    async fn list_submissions(&self, user_id: &str) -> Result<Vec<QuerySubmission>, StoreError> {
        queries::list_submissions(&self.pool, user_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
