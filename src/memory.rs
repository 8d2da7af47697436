use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    clock::{Clock, SystemClock},
    error::JobFailure,
    filter::{PendingJobFilter, StaleJobFilter},
    retry::RetryCadence,
    storage::{JobStorageProvider, StorageError},
    types::{JobId, JobRecord, TrackingId},
};

/// Storage provider that keeps records in process memory. Nothing survives a
/// restart, so it suits tests and single-process tools.
///
/// Purging deletes completed records and moves expired ones to a dead-job
/// list, from which [`revive`](Self::revive) can put them back in play.
pub struct MemoryJobStorage {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    dead_jobs: Arc<RwLock<Vec<JobRecord>>>,
    retry: RetryCadence,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStorage {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            dead_jobs: Arc::new(RwLock::new(Vec::new())),
            retry: RetryCadence::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retry_cadence(mut self, retry: RetryCadence) -> Self {
        self.retry = retry;
        self
    }

    /// Clock used to reschedule failed jobs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn dead_jobs(&self) -> Vec<JobRecord> {
        self.dead_jobs.read().await.clone()
    }

    /// Move a dead job back into the live set with a new expiry.
    pub async fn revive(&self, id: JobId, expire_on: DateTime<Utc>) -> Result<(), StorageError> {
        // Lock order is always `jobs` then `dead_jobs`, as in `purge_stale_jobs`.
        let mut jobs = self.jobs.write().await;
        let mut dead_jobs = self.dead_jobs.write().await;
        let index = dead_jobs
            .iter()
            .position(|j| j.id() == id)
            .ok_or(StorageError::JobNotFound(id))?;

        let mut job = dead_jobs.remove(index);
        job.expire_on = expire_on;
        jobs.insert(id, job);
        Ok(())
    }
}

impl Default for MemoryJobStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStorageProvider for MemoryJobStorage {
    #[instrument(skip_all, err, fields(job_id = %job.id(), command = %job.queue_id))]
    async fn store_job(&self, job: JobRecord, ct: &CancellationToken) -> Result<(), StorageError> {
        if ct.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id()) {
            return Err(anyhow::anyhow!("job {} already stored", job.id()).into());
        }
        jobs.insert(job.id(), job);

        Ok(())
    }

    #[instrument(skip_all, err, fields(command = %filter.queue_id, batch_size = batch_size))]
    async fn get_next_batch(
        &self,
        filter: &PendingJobFilter,
        batch_size: usize,
        ct: &CancellationToken,
    ) -> Result<Vec<JobRecord>, StorageError> {
        if ct.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let jobs = self.jobs.read().await;

        let mut batch: Vec<&JobRecord> = jobs.values().filter(|j| filter.matches(j)).collect();
        batch.sort_by(|a, b| {
            a.execute_after
                .cmp(&b.execute_after)
                .then_with(|| a.id().cmp(&b.id()))
        });

        Ok(batch.into_iter().take(batch_size).cloned().collect())
    }

    #[instrument(skip_all, err, fields(job_id = %job.id()))]
    async fn mark_job_as_complete(
        &self,
        job: &JobRecord,
        _ct: &CancellationToken,
    ) -> Result<(), StorageError> {
        let jid = job.id();
        let mut jobs = self.jobs.write().await;

        let stored = jobs.get_mut(&jid).ok_or(StorageError::JobNotFound(jid))?;
        stored.mark_complete();

        Ok(())
    }

    #[instrument(skip_all, err, fields(job_id = %job.id(), kind = ?failure.kind))]
    async fn on_handler_execution_failure(
        &self,
        job: &JobRecord,
        failure: &JobFailure,
        _ct: &CancellationToken,
    ) -> Result<(), StorageError> {
        let jid = job.id();
        let mut jobs = self.jobs.write().await;

        let stored = jobs.get_mut(&jid).ok_or(StorageError::JobNotFound(jid))?;
        stored.failure_count += 1;
        if self.retry != RetryCadence::Immediate {
            stored.execute_after = self
                .retry
                .next_execute_after(self.clock.now(), stored.failure_count);
        }

        Ok(())
    }

    #[instrument(skip_all, err, fields(purged, dead_lettered))]
    async fn purge_stale_jobs(
        &self,
        filter: &StaleJobFilter,
        _ct: &CancellationToken,
    ) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        let mut dead_jobs = self.dead_jobs.write().await;

        let stale: Vec<JobId> = jobs
            .values()
            .filter(|j| filter.matches(j))
            .map(|j| j.id())
            .collect();

        let mut dead_lettered = 0usize;
        for jid in &stale {
            if let Some(removed_job) = jobs.remove(jid) {
                if !removed_job.is_complete() {
                    dead_jobs.push(removed_job);
                    dead_lettered += 1;
                }
            }
        }

        let span = tracing::Span::current();
        span.record("purged", stale.len());
        span.record("dead_lettered", dead_lettered);

        Ok(())
    }

    #[instrument(skip_all, err, fields(tracking_id = %tracking_id))]
    async fn cancel_job(
        &self,
        tracking_id: TrackingId,
        _ct: &CancellationToken,
    ) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;

        jobs.values_mut()
            .filter(|j| j.tracking_id == Some(tracking_id) && !j.is_complete())
            .for_each(JobRecord::mark_complete);

        Ok(())
    }
}
