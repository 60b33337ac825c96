use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::models::catalog::CatalogError;
use crate::models::job::JobIdentity;
use crate::models::params::JobParameters;
use crate::models::response::{ErrorResponse, JobStatusResponse, MetadataResponse};
use crate::models::submission::{QuerySubmission, Submitter};
use crate::services::cache::CacheError;

/// Error returned by the job endpoints.
pub enum ApiError {
    Cache(CacheError),
    Catalog(CatalogError),
    NotFound(JobIdentity),
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        ApiError::Cache(e)
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        ApiError::Catalog(e)
    }
}

fn cache_status(e: &CacheError) -> StatusCode {
    match e {
        CacheError::InvalidParameter(_) | CacheError::MetadataShape { .. } => {
            StatusCode::BAD_REQUEST
        }
        CacheError::UnknownIdentity(_) => StatusCode::NOT_FOUND,
        CacheError::InvalidTransition { .. } | CacheError::DuplicateMetadata(_) => {
            StatusCode::CONFLICT
        }
        CacheError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CacheError::DispatchFailed(_) => StatusCode::BAD_GATEWAY,
        CacheError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Cache(e) => {
                let status = cache_status(&e);
                if status.is_server_error() {
                    tracing::error!(error = %e, "Request failed");
                }
                (status, e.to_string())
            }
            ApiError::Catalog(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::NotFound(query_id) => {
                (StatusCode::NOT_FOUND, format!("Unknown query {query_id}"))
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Body of a submission: the query parameters, plus the submitting user's
/// `user_id`, `title`, `description` and `area_id` when there is one.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(flatten)]
    pub params: JobParameters,
    #[serde(flatten)]
    pub submitter: Option<Submitter>,
}

/// POST /api/v1/jobs: submit a query, or get the cached one back.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let params = &request.params;
    if let Some(catalog) = &state.catalog {
        catalog.check(params)?;
    }

    let response = match &request.submitter {
        Some(submitter) => {
            let (record, submission) = state
                .cache
                .submit_for(params, submitter, state.queue.as_ref())
                .await?;
            JobStatusResponse::from(record).with_submission(submission)
        }
        None => state.cache.submit(params, state.queue.as_ref()).await?.into(),
    };
    Ok(Json(response))
}

/// POST /api/v1/jobs/{query_id}/cancel: stop a pending or running query.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let record = state.cache.cancel(&JobIdentity::new(query_id)).await?;
    Ok(Json(record.into()))
}

/// GET /api/v1/jobs/{query_id}/submissions/{user_id}
pub async fn get_submission(
    State(state): State<AppState>,
    Path((query_id, user_id)): Path<(String, String)>,
) -> Result<Json<QuerySubmission>, ApiError> {
    let query_id = JobIdentity::new(query_id);
    match state.cache.submission(&query_id, &user_id).await? {
        Some(submission) => Ok(Json(submission)),
        None => Err(ApiError::NotFound(query_id)),
    }
}

/// GET /api/v1/users/{user_id}/jobs: a user's submissions, newest first.
pub async fn list_user_jobs(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<QuerySubmission>>, ApiError> {
    Ok(Json(state.cache.history(&user_id).await?))
}

/// GET /api/v1/jobs/{query_id}: poll a query's status and progress.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let query_id = JobIdentity::new(query_id);
    match state.cache.lookup(&query_id).await? {
        Some(record) => Ok(Json(record.into())),
        None => Err(ApiError::NotFound(query_id)),
    }
}

/// GET /api/v1/jobs/{query_id}/metadata: scene statistics for a query.
pub async fn get_job_metadata(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let query_id = JobIdentity::new(query_id);
    match state.cache.metadata(&query_id).await? {
        Some(metadata) => Ok(Json(metadata.into())),
        None => Err(ApiError::NotFound(query_id)),
    }
}
