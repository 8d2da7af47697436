use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::{
    coordinator::BatchReport, filter::PendingJobFilter, scheduler::SchedulerInner,
    storage::StorageError,
};

/// Fetch one batch for `queue_id` and dispatch it.
#[instrument(skip_all, err, fields(command = queue_id))]
pub(crate) async fn run_poll_cycle(
    inner: &SchedulerInner,
    queue_id: &str,
    ct: &CancellationToken,
) -> Result<BatchReport, StorageError> {
    let limits = inner.config.limits_for(queue_id);
    let filter = PendingJobFilter::new(queue_id, inner.clock.now());

    let records = inner
        .storage
        .get_next_batch(&filter, limits.batch_size, ct)
        .await?;
    if records.is_empty() {
        return Ok(BatchReport::default());
    }

    debug!(fetched = records.len(), "dispatching batch");
    Ok(inner.coordinator.dispatch_batch(records, &limits).await)
}

/// Poll loop for one command type.
///
/// A non-empty batch is followed by another poll straight away. An empty
/// batch waits for the poll interval or for a job of this type to be queued.
/// A storage error, on the fetch or on any acknowledgement of the batch,
/// waits for the error backoff. Cancellation stops the loop
/// before the next fetch; a batch already dispatched runs to completion.
pub(crate) async fn run(
    inner: Arc<SchedulerInner>,
    queue_id: &'static str,
    signal: Arc<Notify>,
    shutdown: CancellationToken,
) {
    info!(command = queue_id, "batch poller started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let (wait, wake_on_enqueue) = match run_poll_cycle(&inner, queue_id, &shutdown).await {
            Ok(report) if report.unacknowledged > 0 => {
                error!(
                    command = queue_id,
                    unacknowledged = report.unacknowledged,
                    "job outcomes could not be written to storage"
                );
                (inner.config.storage_error_backoff(), false)
            }
            Ok(report) if report.fetched > 0 => {
                debug!(
                    command = queue_id,
                    completed = report.completed,
                    failed = report.failed,
                    unacknowledged = report.unacknowledged,
                    "batch finished"
                );
                continue;
            }
            Ok(_) => (inner.config.poll_interval(), true),
            Err(StorageError::Cancelled) if shutdown.is_cancelled() => break,
            Err(error) => {
                error!(command = queue_id, %error, "failed to fetch next batch");
                (inner.config.storage_error_backoff(), false)
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = signal.notified(), if wake_on_enqueue => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!(command = queue_id, "batch poller stopped");
}
