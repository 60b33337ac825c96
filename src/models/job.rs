use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::params::GeoBounds;

/// Opaque cache key derived from a query's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobIdentity(String);

impl JobIdentity {
    /// Wrap an identity received from outside (URL path, queue payload).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a query job.
///
/// Valid transitions are `Pending -> Running -> {Done, Error}`, plus
/// `Pending -> Error` for a job cancelled before any worker claimed it.
/// `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
        )
    }
}

/// Cached result record for a query, one per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub query_id: JobIdentity,
    pub status: JobStatus,
    pub scenes_processed: i32,
    pub total_scenes: i32,
    pub result_location: Option<String>,
    pub error: Option<String>,
    pub bounds: GeoBounds,
    /// Application fields copied from the query's extra parameters.
    pub extensions: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh record as created on first submission.
    pub fn pending(
        query_id: JobIdentity,
        bounds: GeoBounds,
        extensions: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            query_id,
            status: JobStatus::Pending,
            scenes_processed: 0,
            total_scenes: 0,
            result_location: None,
            error: None,
            bounds,
            extensions,
            created_at: now,
            updated_at: now,
        }
    }
}
