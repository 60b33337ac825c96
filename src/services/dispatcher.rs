use async_trait::async_trait;

use crate::models::job::JobIdentity;
use crate::models::params::JobParameters;
use crate::services::queue::QueueError;

/// Hands a newly created query to whatever computes it.
///
/// The cache calls `enqueue` at most once per identity, so implementations
/// may deliver at-least-once without risking duplicate computations being
/// requested.
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    async fn enqueue(
        &self,
        query_id: &JobIdentity,
        params: &JobParameters,
    ) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Dispatch rejected: {0}")]
    Rejected(String),
}
