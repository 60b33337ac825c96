use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{JobIdentity, JobRecord, JobStatus};
use crate::models::metadata::JobMetadata;
use crate::models::submission::QuerySubmission;
use crate::services::store::{Conditional, InsertOutcome, JobStore, StoreError, Transition};

/// Process-local store for tests and single-node runs.
///
/// Every operation holds the record map's lock for its whole duration, so
/// insert-if-absent and the conditional updates are atomic. Locks are taken
/// records first, then submissions.
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobIdentity, JobRecord>>,
    metadata: Mutex<HashMap<JobIdentity, JobMetadata>>,
    submissions: Mutex<HashMap<(JobIdentity, String), QuerySubmission>>,
    offline: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<JobIdentity, JobRecord>>, StoreError> {
        self.ensure_online()?;
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("record lock poisoned".to_string()))
    }

    fn metadata(&self) -> Result<MutexGuard<'_, HashMap<JobIdentity, JobMetadata>>, StoreError> {
        self.ensure_online()?;
        self.metadata
            .lock()
            .map_err(|_| StoreError::Unavailable("metadata lock poisoned".to_string()))
    }

    fn submissions(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<(JobIdentity, String), QuerySubmission>>, StoreError> {
        self.ensure_online()?;
        self.submissions
            .lock()
            .map_err(|_| StoreError::Unavailable("submission lock poisoned".to_string()))
    }

    /// Backdate a record, as if nothing had touched it since `at`.
    pub fn set_updated_at(&self, query_id: &JobIdentity, at: DateTime<Utc>) {
        if let Ok(mut records) = self.records.lock() {
            if let Some(record) = records.get_mut(query_id) {
                record.updated_at = at;
            }
        }
    }

    fn update_if<F>(
        &self,
        query_id: &JobIdentity,
        expected: JobStatus,
        apply: F,
    ) -> Result<Conditional, StoreError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut records = self.records()?;
        let Some(record) = records.get_mut(query_id) else {
            return Ok(Conditional::Missing);
        };
        if record.status != expected {
            return Ok(Conditional::StatusMismatch(record.status));
        }
        apply(record);
        record.updated_at = Utc::now();
        Ok(Conditional::Applied(record.clone()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, query_id: &JobIdentity) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records()?.get(query_id).cloned())
    }

    async fn insert_if_absent(&self, record: JobRecord) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records()?;
        match records.entry(record.query_id.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => Ok(InsertOutcome::Created(slot.insert(record).clone())),
        }
    }

    async fn transition(
        &self,
        query_id: &JobIdentity,
        transition: Transition,
    ) -> Result<Conditional, StoreError> {
        self.update_if(query_id, transition.from, |record| {
            record.status = transition.to;
            if transition.result_location.is_some() {
                record.result_location = transition.result_location;
            }
            if transition.error.is_some() {
                record.error = transition.error;
            }
        })
    }

    async fn update_progress(
        &self,
        query_id: &JobIdentity,
        scenes_processed: i32,
        total_scenes: i32,
    ) -> Result<Conditional, StoreError> {
        self.update_if(query_id, JobStatus::Running, |record| {
            record.scenes_processed = scenes_processed;
            record.total_scenes = total_scenes;
        })
    }

    async fn remove_pending(&self, query_id: &JobIdentity) -> Result<bool, StoreError> {
        let mut records = self.records()?;
        match records.get(query_id) {
            Some(record) if record.status == JobStatus::Pending => {
                records.remove(query_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_metadata(&self, metadata: JobMetadata) -> Result<bool, StoreError> {
        let mut all = self.metadata()?;
        match all.entry(metadata.query_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(metadata);
                Ok(true)
            }
        }
    }

    async fn get_metadata(
        &self,
        query_id: &JobIdentity,
    ) -> Result<Option<JobMetadata>, StoreError> {
        Ok(self.metadata()?.get(query_id).cloned())
    }

    async fn fail_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = self.records()?;
        let now = Utc::now();
        Ok(records
            .values_mut()
            .filter(|r| r.status == JobStatus::Running && r.updated_at < cutoff)
            .map(|record| {
                record.status = JobStatus::Error;
                record.error = Some(reason.to_string());
                record.updated_at = now;
                record.clone()
            })
            .collect())
    }

    async fn record_submission(
        &self,
        submission: QuerySubmission,
    ) -> Result<QuerySubmission, StoreError> {
        let records = self.records()?;
        let Some(record) = records.get(&submission.query_id) else {
            return Err(StoreError::Corrupt {
                query_id: submission.query_id.to_string(),
                reason: "submission for a query with no record".to_string(),
            });
        };

        let mut submissions = self.submissions()?;
        let key = (submission.query_id.clone(), submission.user_id.clone());
        let stored = match submissions.entry(key) {
            Entry::Occupied(mut existing) => {
                let existing = existing.get_mut();
                existing.title = submission.title;
                existing.description = submission.description;
                existing.area_id = submission.area_id;
                existing.clone()
            }
            Entry::Vacant(slot) => slot.insert(submission).clone(),
        };
        Ok(stored.with_record(record))
    }

    async fn get_submission(
        &self,
        query_id: &JobIdentity,
        user_id: &str,
    ) -> Result<Option<QuerySubmission>, StoreError> {
        let records = self.records()?;
        let submissions = self.submissions()?;
        Ok(submissions
            .get(&(query_id.clone(), user_id.to_string()))
            .and_then(|s| records.get(query_id).map(|r| s.clone().with_record(r))))
    }

    async fn list_submissions(&self, user_id: &str) -> Result<Vec<QuerySubmission>, StoreError> {
        let records = self.records()?;
        let submissions = self.submissions()?;
        let mut mine: Vec<QuerySubmission> = submissions
            .values()
            .filter(|s| s.user_id == user_id)
            .filter_map(|s| records.get(&s.query_id).map(|r| s.clone().with_record(r)))
            .collect();
        mine.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(mine)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.ensure_online()
    }
}
