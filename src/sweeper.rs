use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{filter::StaleJobFilter, scheduler::SchedulerInner, storage::StorageError};

#[instrument(skip_all, err)]
pub(crate) async fn purge_once(
    inner: &SchedulerInner,
    ct: &CancellationToken,
) -> Result<(), StorageError> {
    let filter = StaleJobFilter::new(inner.clock.now());
    inner.storage.purge_stale_jobs(&filter, ct).await
}

/// Purge loop, on its own cadence so a busy poller never starves cleanup.
/// The first purge runs on start.
pub(crate) async fn run(inner: Arc<SchedulerInner>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.purge_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(every = ?inner.config.purge_interval(), "stale purge sweeper started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A purge that has started is allowed to finish.
        if let Err(error) = purge_once(&inner, &CancellationToken::new()).await {
            error!(%error, "failed to purge stale jobs");
        }
    }

    info!("stale purge sweeper stopped");
}
