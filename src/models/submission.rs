use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{JobIdentity, JobRecord};

/// Who is asking for a query, as sent with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Submitter {
    #[garde(length(min = 1, max = 25))]
    pub user_id: String,

    #[serde(default)]
    #[garde(length(max = 100))]
    pub title: String,

    #[serde(default)]
    #[garde(length(max = 10000))]
    pub description: String,

    /// Catalog area the query was drawn over, if any.
    #[serde(default)]
    #[garde(length(max = 100))]
    pub area_id: Option<String>,
}

/// A user's submission of a query.
///
/// Many users can submit the same query; they share one [`JobRecord`] but
/// each gets their own submission, keyed by `(query_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySubmission {
    pub query_id: JobIdentity,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub area_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// When the shared record became terminal, never earlier than
    /// `submitted_at`. `None` while the query is still pending or running.
    pub finished_at: Option<DateTime<Utc>>,
}

impl QuerySubmission {
    pub fn new(query_id: JobIdentity, submitter: &Submitter) -> Self {
        Self {
            query_id,
            user_id: submitter.user_id.clone(),
            title: submitter.title.clone(),
            description: submitter.description.clone(),
            area_id: submitter.area_id.clone(),
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Fill in `finished_at` from the shared record.
    pub fn with_record(mut self, record: &JobRecord) -> Self {
        self.finished_at = record
            .status
            .is_terminal()
            .then(|| record.updated_at.max(self.submitted_at));
        self
    }

    pub fn is_complete(&self) -> bool {
        self.finished_at.is_some()
    }
}
