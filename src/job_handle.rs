use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    error::JobFailure,
    storage::{JobStorageProvider, StorageError},
    types::JobRecord,
};

/// A fetched record awaiting its outcome. Acknowledging consumes the handle,
/// so each attempt reports back to storage exactly once.
pub(crate) struct JobHandle {
    storage: Arc<dyn JobStorageProvider>,
    record: JobRecord,
}

impl JobHandle {
    pub(crate) fn new(storage: Arc<dyn JobStorageProvider>, record: JobRecord) -> Self {
        Self { storage, record }
    }

    pub(crate) fn record(&self) -> &JobRecord {
        &self.record
    }

    pub(crate) async fn complete(mut self, ct: &CancellationToken) -> Result<(), StorageError> {
        self.record.mark_complete();
        self.storage.mark_job_as_complete(&self.record, ct).await
    }

    pub(crate) async fn fail(self, failure: &JobFailure, ct: &CancellationToken) -> Result<(), StorageError> {
        self.storage
            .on_handler_execution_failure(&self.record, failure, ct)
            .await
    }
}
