//! Runs the records of one batch and reports each outcome back to storage.

use std::{any::Any, sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::{
    command::JobContext,
    config::EffectiveLimits,
    error::{FailureKind, JobFailure},
    job_handle::JobHandle,
    registry::HandlerRegistry,
    scope::{ExecutionScope, GlobalScope},
    storage::JobStorageProvider,
    types::JobRecord,
};

/// How long a handler that overran its time limit may keep running after its
/// cancellation token fires. The task is aborted once this elapses.
const CANCELLATION_GRACE: Duration = Duration::from_millis(250);

/// Counts for one fetch-execute-acknowledge cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs whose outcome could not be written back to storage.
    pub unacknowledged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed(FailureKind),
    Unacknowledged,
}

#[derive(Clone)]
pub(crate) struct ExecutionCoordinator {
    storage: Arc<dyn JobStorageProvider>,
    registry: Arc<HandlerRegistry>,
    global: Arc<GlobalScope>,
}

impl ExecutionCoordinator {
    pub(crate) fn new(
        storage: Arc<dyn JobStorageProvider>,
        registry: Arc<HandlerRegistry>,
        global: Arc<GlobalScope>,
    ) -> Self {
        Self {
            storage,
            registry,
            global,
        }
    }

    /// Execute every record, at most `limits.max_concurrency` at a time. One
    /// job's failure never affects its siblings.
    pub(crate) async fn dispatch_batch(
        &self,
        records: Vec<JobRecord>,
        limits: &EffectiveLimits,
    ) -> BatchReport {
        let mut report = BatchReport {
            fetched: records.len(),
            ..Default::default()
        };
        let semaphore = Arc::new(Semaphore::new(limits.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for record in records {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                unreachable!("batch semaphore is never closed");
            };
            let this = self.clone();
            let time_limit = limits.execution_time_limit;
            tasks.spawn(async move {
                let _permit = permit;
                this.execute(record, time_limit).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Failed(_)) => report.failed += 1,
                Ok(Outcome::Unacknowledged) => report.unacknowledged += 1,
                Err(error) => {
                    error!(%error, "job task aborted before acknowledging");
                    report.unacknowledged += 1;
                }
            }
        }

        report
    }

    #[instrument(skip_all, fields(job_id = %record.id(), command = %record.queue_id))]
    pub(crate) async fn execute(&self, record: JobRecord, time_limit: Option<Duration>) -> Outcome {
        let handle = JobHandle::new(Arc::clone(&self.storage), record);
        // Acknowledgements are not tied to shutdown, so a finishing job still
        // records its outcome.
        let ack = CancellationToken::new();

        match self.run_handler(handle.record(), time_limit).await {
            Ok(()) => match handle.complete(&ack).await {
                Ok(()) => {
                    debug!("job completed");
                    Outcome::Completed
                }
                Err(error) => {
                    error!(%error, "failed to mark job as complete");
                    Outcome::Unacknowledged
                }
            },
            Err(failure) => {
                warn!(kind = ?failure.kind, error = %failure, "job attempt failed");
                match handle.fail(&failure, &ack).await {
                    Ok(()) => Outcome::Failed(failure.kind),
                    Err(error) => {
                        error!(%error, "failed to report job failure to storage");
                        Outcome::Unacknowledged
                    }
                }
            }
        }
    }

    async fn run_handler(
        &self,
        record: &JobRecord,
        time_limit: Option<Duration>,
    ) -> Result<(), JobFailure> {
        let dispatch = self.registry.resolve(&record.queue_id)?;

        let cancellation = CancellationToken::new();
        let scope = Arc::new(ExecutionScope::new(record.id(), Arc::clone(&self.global)));
        let ctx = JobContext::new(
            record.id(),
            record.tracking_id,
            record.failure_count,
            scope,
            cancellation.clone(),
        );
        let payload = record.command.clone();

        // Handler construction runs inside the task too; a panicking factory
        // ends up as a panicked join like a panicking handler.
        let mut task = tokio::spawn(async move { dispatch.prepare(&payload, ctx)?.await });
        let joined = match time_limit {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancellation.cancel();
                    if tokio::time::timeout(CANCELLATION_GRACE, &mut task).await.is_err() {
                        task.abort();
                    }
                    return Err(JobFailure::timed_out(limit));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(error) if error.is_panic() => Err(JobFailure::panicked(panic_message(
                error.into_panic(),
            ))),
            Err(error) => Err(JobFailure::new(FailureKind::Handler, error.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
