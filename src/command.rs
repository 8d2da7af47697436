use std::sync::Arc;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use tokio_util::sync::CancellationToken;

use crate::{
    scope::ExecutionScope,
    types::{JobId, TrackingId},
};

/// A unit of work that can be queued. The name identifies the command type in
/// storage and selects the handler, so it must be stable across releases.
pub trait Command: Encode + Decode + Send + Sync + 'static {
    fn name() -> &'static str;
}

/// Executes one command type.
///
/// Delivery is at-least-once: a crash between running the handler and
/// recording completion re-runs the job after restart, so handlers must
/// tolerate re-execution.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    type Error: Into<anyhow::Error> + Send;

    async fn handle(&self, command: C, ctx: &JobContext) -> Result<(), Self::Error>;
}

/// What a handler knows about the attempt it is running.
#[derive(Debug)]
pub struct JobContext {
    job_id: JobId,
    tracking_id: Option<TrackingId>,
    failure_count: u32,
    scope: Arc<ExecutionScope>,
    cancellation: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        tracking_id: Option<TrackingId>,
        failure_count: u32,
        scope: Arc<ExecutionScope>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            tracking_id,
            failure_count,
            scope,
            cancellation,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn tracking_id(&self) -> Option<TrackingId> {
        self.tracking_id
    }

    /// Failed attempts before this one.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    /// Cancelled when the attempt exceeds its execution time limit. The handler
    /// then has a short grace period to stop on its own before its task is
    /// aborted; the attempt is reported as timed out either way.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
