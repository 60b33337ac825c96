//! Persistence seam for query records and metadata.
//!
//! Implementations must make [`JobStore::insert_if_absent`] a single atomic
//! operation and apply [`JobStore::transition`] / [`JobStore::update_progress`]
//! only when the stored status matches the expected one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{JobIdentity, JobRecord, JobStatus};
use crate::models::metadata::JobMetadata;
use crate::models::submission::QuerySubmission;

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The record was new and has been stored.
    Created(JobRecord),
    /// A record already existed for this identity; it is returned untouched.
    Existing(JobRecord),
}

/// Result of a conditional update against a record's status.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional {
    Applied(JobRecord),
    /// No record for the identity.
    Missing,
    /// The record exists but its status was not the expected one.
    StatusMismatch(JobStatus),
}

/// A status change, applied only if the record is currently in `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub result_location: Option<String>,
    pub error: Option<String>,
}

impl Transition {
    pub fn new(from: JobStatus, to: JobStatus) -> Self {
        Self {
            from,
            to,
            result_location: None,
            error: None,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, query_id: &JobIdentity) -> Result<Option<JobRecord>, StoreError>;

    /// Atomically store `record` unless one already exists for its identity.
    async fn insert_if_absent(&self, record: JobRecord) -> Result<InsertOutcome, StoreError>;

    async fn transition(
        &self,
        query_id: &JobIdentity,
        transition: Transition,
    ) -> Result<Conditional, StoreError>;

    /// Set progress counters on a record that is currently `Running`.
    async fn update_progress(
        &self,
        query_id: &JobIdentity,
        scenes_processed: i32,
        total_scenes: i32,
    ) -> Result<Conditional, StoreError>;

    /// Delete a record only while it is still `Pending`. Returns whether a
    /// record was removed.
    async fn remove_pending(&self, query_id: &JobIdentity) -> Result<bool, StoreError>;

    /// Store metadata unless some already exists. Returns `false` when
    /// metadata was already present.
    async fn insert_metadata(&self, metadata: JobMetadata) -> Result<bool, StoreError>;

    async fn get_metadata(&self, query_id: &JobIdentity)
        -> Result<Option<JobMetadata>, StoreError>;

    /// Move every `Running` record last updated before `cutoff` to `Error`
    /// with `reason`, in one atomic step. Returns the records changed.
    async fn fail_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Store a user's submission of an existing record. A repeat submission
    /// by the same user keeps the original `submitted_at` and takes the new
    /// title, description and area. Returns the stored submission with
    /// `finished_at` resolved against the record.
    async fn record_submission(
        &self,
        submission: QuerySubmission,
    ) -> Result<QuerySubmission, StoreError>;

    async fn get_submission(
        &self,
        query_id: &JobIdentity,
        user_id: &str,
    ) -> Result<Option<QuerySubmission>, StoreError>;

    /// A user's submissions, newest first.
    async fn list_submissions(&self, user_id: &str) -> Result<Vec<QuerySubmission>, StoreError>;

    /// Check store connectivity (for health checks).
    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Corrupt record {query_id}: {reason}")]
    Corrupt { query_id: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            other => StoreError::Database(other),
        }
    }
}
