use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::{JobIdentity, JobRecord, JobStatus};
use crate::models::metadata::JobMetadata;
use crate::models::params::GeoBounds;
use crate::models::submission::QuerySubmission;

/// Response for submitting or polling a query.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub query_id: JobIdentity,
    pub status: JobStatus,
    pub scenes_processed: i32,
    pub total_scenes: i32,
    pub result_location: Option<String>,
    pub error: Option<String>,
    pub bounds: GeoBounds,
    /// The caller's own submission, when the query was submitted for a user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<QuerySubmission>,
}

impl JobStatusResponse {
    pub fn with_submission(mut self, submission: QuerySubmission) -> Self {
        self.submission = Some(submission);
        self
    }
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            query_id: record.query_id,
            status: record.status,
            scenes_processed: record.scenes_processed,
            total_scenes: record.total_scenes,
            result_location: record.result_location,
            error: record.error,
            bounds: record.bounds,
            submission: None,
        }
    }
}

/// One row of the per-acquisition breakdown.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub acquired_at: DateTime<Utc>,
    pub clean_pixels: i64,
    pub clean_pixel_percentage: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub query_id: JobIdentity,
    pub bounds: GeoBounds,
    pub scene_count: i64,
    pub pixel_count: i64,
    pub clean_pixel_count: i64,
    pub percentage_clean_pixels: f64,
    pub acquisitions: Vec<AcquisitionSummary>,
}

impl From<JobMetadata> for MetadataResponse {
    fn from(metadata: JobMetadata) -> Self {
        let acquisitions = metadata
            .acquisitions_with_pixels()
            .map(|(at, clean_pixels, pct)| AcquisitionSummary {
                acquired_at: *at,
                clean_pixels,
                clean_pixel_percentage: pct,
            })
            .collect();

        Self {
            percentage_clean_pixels: metadata.percentage_clean_pixels(),
            query_id: metadata.query_id,
            bounds: metadata.bounds,
            scene_count: metadata.scene_count,
            pixel_count: metadata.pixel_count,
            clean_pixel_count: metadata.clean_pixel_count,
            acquisitions,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
