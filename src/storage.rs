use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::JobFailure,
    filter::{PendingJobFilter, StaleJobFilter},
    types::{JobId, JobRecord, TrackingId},
};

/// Error raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("storage operation cancelled")]
    Cancelled,
    #[error("operation not supported by this storage provider: {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence contract for job records. The scheduler never talks to storage
/// in any other way.
///
/// Every call receives a cancellation token. Implementations must leave the
/// store consistent when the token fires mid-operation, using the atomic
/// update primitives of the backing store; the scheduler provides no locking
/// of its own.
#[async_trait]
pub trait JobStorageProvider: Send + Sync {
    /// Persist a new record. Must be durable before returning.
    async fn store_job(&self, job: JobRecord, ct: &CancellationToken) -> Result<(), StorageError>;

    /// Fetch up to `batch_size` records selected by `filter`, earliest
    /// `execute_after` first.
    async fn get_next_batch(
        &self,
        filter: &PendingJobFilter,
        batch_size: usize,
        ct: &CancellationToken,
    ) -> Result<Vec<JobRecord>, StorageError>;

    /// Set `is_complete` on the stored record, by replacing it or by a
    /// partial update. Marking an already complete record is not an error.
    async fn mark_job_as_complete(
        &self,
        job: &JobRecord,
        ct: &CancellationToken,
    ) -> Result<(), StorageError>;

    /// Called exactly once per failed attempt. Leaving the record untouched
    /// makes it eligible again on the next poll; moving `execute_after` into
    /// the future lets other jobs progress past a chronically failing one.
    async fn on_handler_execution_failure(
        &self,
        job: &JobRecord,
        failure: &JobFailure,
        ct: &CancellationToken,
    ) -> Result<(), StorageError>;

    /// Delete completed records and delete or relocate records that expired
    /// before completing. Pushing `expire_on` forward instead retries them.
    async fn purge_stale_jobs(
        &self,
        filter: &StaleJobFilter,
        ct: &CancellationToken,
    ) -> Result<(), StorageError>;

    /// Mark every incomplete record carrying `tracking_id` as complete, so it
    /// is never fetched again.
    async fn cancel_job(
        &self,
        tracking_id: TrackingId,
        ct: &CancellationToken,
    ) -> Result<(), StorageError> {
        let _ = (tracking_id, ct);
        Err(StorageError::Unsupported("cancel_job"))
    }
}
