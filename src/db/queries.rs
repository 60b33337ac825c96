use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::models::job::{JobIdentity, JobRecord, JobStatus};
use crate::models::metadata::JobMetadata;
use crate::models::params::GeoBounds;
use crate::models::submission::QuerySubmission;
use crate::services::store::{StoreError, Transition};

const RECORD_COLUMNS: &str = "query_id, status, scenes_processed, total_scenes, result_location, \
     error, latitude_min, latitude_max, longitude_min, longitude_max, extensions, \
     created_at, updated_at";

/// Submission columns joined with the record's terminal time.
const SUBMISSION_SELECT: &str = r#"
    SELECT s.query_id, s.user_id, s.title, s.description, s.area_id, s.submitted_at,
           CASE WHEN r.status IN ('DONE', 'ERROR')
                THEN GREATEST(r.updated_at, s.submitted_at)
           END AS finished_at
    FROM query_submissions s
    JOIN query_results r ON r.query_id = s.query_id
"#;

fn record_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let query_id: String = row.try_get("query_id")?;
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|_| StoreError::Corrupt {
        query_id: query_id.clone(),
        reason: format!("unknown status {status_str:?}"),
    })?;
    let extensions: Json<BTreeMap<String, String>> = row.try_get("extensions")?;

    Ok(JobRecord {
        query_id: JobIdentity::new(query_id),
        status,
        scenes_processed: row.try_get("scenes_processed")?,
        total_scenes: row.try_get("total_scenes")?,
        result_location: row.try_get("result_location")?,
        error: row.try_get("error")?,
        bounds: GeoBounds {
            latitude_min: row.try_get("latitude_min")?,
            latitude_max: row.try_get("latitude_max")?,
            longitude_min: row.try_get("longitude_min")?,
            longitude_max: row.try_get("longitude_max")?,
        },
        extensions: extensions.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a pending record unless one exists. Returns `None` on conflict.
pub async fn insert_record_if_absent(
    pool: &PgPool,
    record: &JobRecord,
) -> Result<Option<JobRecord>, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO query_results
            (query_id, status, latitude_min, latitude_max, longitude_min, longitude_max, extensions)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (query_id) DO NOTHING
        RETURNING {RECORD_COLUMNS}
        "#
    );

    let row = sqlx::query(&sql)
        .bind(record.query_id.as_str())
        .bind(record.status.to_string())
        .bind(record.bounds.latitude_min)
        .bind(record.bounds.latitude_max)
        .bind(record.bounds.longitude_min)
        .bind(record.bounds.longitude_max)
        .bind(Json(&record.extensions))
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Get a record by identity
pub async fn get_record(
    pool: &PgPool,
    query_id: &JobIdentity,
) -> Result<Option<JobRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM query_results WHERE query_id = $1");
    let row = sqlx::query(&sql)
        .bind(query_id.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Get only the status of a record
pub async fn get_status(
    pool: &PgPool,
    query_id: &JobIdentity,
) -> Result<Option<JobStatus>, StoreError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM query_results WHERE query_id = $1")
            .bind(query_id.as_str())
            .fetch_optional(pool)
            .await?;

    status
        .map(|s| {
            JobStatus::from_str(&s).map_err(|_| StoreError::Corrupt {
                query_id: query_id.to_string(),
                reason: format!("unknown status {s:?}"),
            })
        })
        .transpose()
}

/// Apply a status change if the record is in the expected state.
/// Returns `None` when no row matched.
pub async fn transition_record(
    pool: &PgPool,
    query_id: &JobIdentity,
    transition: &Transition,
) -> Result<Option<JobRecord>, StoreError> {
    let sql = format!(
        r#"
        UPDATE query_results
        SET status = $1,
            result_location = COALESCE($2, result_location),
            error = COALESCE($3, error),
            updated_at = NOW()
        WHERE query_id = $4 AND status = $5
        RETURNING {RECORD_COLUMNS}
        "#
    );

    let row = sqlx::query(&sql)
        .bind(transition.to.to_string())
        .bind(transition.result_location.as_deref())
        .bind(transition.error.as_deref())
        .bind(query_id.as_str())
        .bind(transition.from.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Update progress counters on a running record.
pub async fn update_progress(
    pool: &PgPool,
    query_id: &JobIdentity,
    scenes_processed: i32,
    total_scenes: i32,
) -> Result<Option<JobRecord>, StoreError> {
    let sql = format!(
        r#"
        UPDATE query_results
        SET scenes_processed = $1,
            total_scenes = $2,
            updated_at = NOW()
        WHERE query_id = $3 AND status = 'RUNNING'
        RETURNING {RECORD_COLUMNS}
        "#
    );

    let row = sqlx::query(&sql)
        .bind(scenes_processed)
        .bind(total_scenes)
        .bind(query_id.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Delete a record that has not been picked up yet
pub async fn delete_pending(pool: &PgPool, query_id: &JobIdentity) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM query_results WHERE query_id = $1 AND status = 'PENDING'")
        .bind(query_id.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail every RUNNING record not updated since `cutoff`.
pub async fn fail_stale_running(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<JobRecord>, StoreError> {
    let sql = format!(
        r#"
        UPDATE query_results
        SET status = 'ERROR',
            error = $1,
            updated_at = NOW()
        WHERE status = 'RUNNING' AND updated_at < $2
        RETURNING {RECORD_COLUMNS}
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(reason)
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

    rows.iter().map(record_from_row).collect()
}

fn submission_from_row(row: &PgRow) -> Result<QuerySubmission, StoreError> {
    Ok(QuerySubmission {
        query_id: JobIdentity::new(row.try_get::<String, _>("query_id")?),
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        area_id: row.try_get("area_id")?,
        submitted_at: row.try_get("submitted_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

/// Insert or refresh a submission. The first `submitted_at` is kept.
pub async fn upsert_submission(
    pool: &PgPool,
    submission: &QuerySubmission,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO query_submissions
            (query_id, user_id, title, description, area_id, submitted_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (query_id, user_id) DO UPDATE
        SET title = EXCLUDED.title,
            description = EXCLUDED.description,
            area_id = EXCLUDED.area_id
        "#,
    )
    .bind(submission.query_id.as_str())
    .bind(&submission.user_id)
    .bind(&submission.title)
    .bind(&submission.description)
    .bind(submission.area_id.as_deref())
    .bind(submission.submitted_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_submission(
    pool: &PgPool,
    query_id: &JobIdentity,
    user_id: &str,
) -> Result<Option<QuerySubmission>, StoreError> {
    let sql = format!("{SUBMISSION_SELECT} WHERE s.query_id = $1 AND s.user_id = $2");
    let row = sqlx::query(&sql)
        .bind(query_id.as_str())
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(submission_from_row).transpose()
}

/// A user's submissions, newest first
pub async fn list_submissions(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<QuerySubmission>, StoreError> {
    let sql = format!("{SUBMISSION_SELECT} WHERE s.user_id = $1 ORDER BY s.submitted_at DESC");
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;

    rows.iter().map(submission_from_row).collect()
}

/// Insert metadata unless present. Returns whether a row was written.
pub async fn insert_metadata(pool: &PgPool, metadata: &JobMetadata) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO query_metadata
            (query_id, latitude_min, latitude_max, longitude_min, longitude_max,
             scene_count, pixel_count, clean_pixel_count,
             acquisitions, clean_pixel_counts, clean_pixel_percentages)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (query_id) DO NOTHING
        "#,
    )
    .bind(metadata.query_id.as_str())
    .bind(metadata.bounds.latitude_min)
    .bind(metadata.bounds.latitude_max)
    .bind(metadata.bounds.longitude_min)
    .bind(metadata.bounds.longitude_max)
    .bind(metadata.scene_count)
    .bind(metadata.pixel_count)
    .bind(metadata.clean_pixel_count)
    .bind(&metadata.acquisitions)
    .bind(&metadata.clean_pixel_counts)
    .bind(&metadata.clean_pixel_percentages)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Get metadata by identity
pub async fn get_metadata(
    pool: &PgPool,
    query_id: &JobIdentity,
) -> Result<Option<JobMetadata>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT query_id, latitude_min, latitude_max, longitude_min, longitude_max,
               scene_count, pixel_count, clean_pixel_count,
               acquisitions, clean_pixel_counts, clean_pixel_percentages
        FROM query_metadata
        WHERE query_id = $1
        "#,
    )
    .bind(query_id.as_str())
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };

    Ok(Some(JobMetadata {
        query_id: JobIdentity::new(r.try_get::<String, _>("query_id")?),
        bounds: GeoBounds {
            latitude_min: r.try_get("latitude_min")?,
            latitude_max: r.try_get("latitude_max")?,
            longitude_min: r.try_get("longitude_min")?,
            longitude_max: r.try_get("longitude_max")?,
        },
        scene_count: r.try_get("scene_count")?,
        pixel_count: r.try_get("pixel_count")?,
        clean_pixel_count: r.try_get("clean_pixel_count")?,
        acquisitions: r.try_get("acquisitions")?,
        clean_pixel_counts: r.try_get("clean_pixel_counts")?,
        clean_pixel_percentages: r.try_get("clean_pixel_percentages")?,
    }))
}
