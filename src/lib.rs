//! Durable command-job scheduler.
//!
//! Producers queue [`Command`] values through a [`JobEnqueuer`]. Each one is
//! stored as a [`JobRecord`] by a pluggable [`JobStorageProvider`]. A
//! [`JobScheduler`] polls due records in batches per command type, runs them
//! through their registered [`CommandHandler`] and reports each outcome back
//! to storage. A separate sweeper asks storage to purge completed and expired
//! records.
//!
//! Execution is at-least-once: handlers must tolerate running again for the
//! same job.
//!
//! ```rust,ignore
//! let storage = Arc::new(MemoryJobStorage::new());
//! let scheduler = JobScheduler::builder(storage)
//!     .service(Mailer::connect(&smtp_url)?)
//!     .register_scoped::<SendEmail, _, _>(|scope| {
//!         Ok(SendEmailHandler { mailer: scope.resolve()? })
//!     })
//!     .limits_for::<SendEmail>(CommandLimits::default().with_time_limit(Duration::from_secs(30)))
//!     .build()?;
//!
//! scheduler.enqueuer().queue_job(&SendEmail { to: "a@b.c".into() }).await?;
//! let running = scheduler.start(CancellationToken::new());
//! // ...
//! running.shutdown().await;
//! ```

mod clock;
mod command;
mod config;
mod coordinator;
mod error;
mod filter;
mod job_handle;
mod memory;
mod poller;
mod registry;
mod retry;
mod scheduler;
mod scope;
mod storage;
mod sweeper;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandHandler, JobContext};
pub use config::{CommandLimits, EffectiveLimits, JobQueueConfig};
pub use coordinator::BatchReport;
pub use error::{ConfigError, FailureKind, JobFailure, QueueError, ResolveError};
pub use filter::{PendingJobFilter, StaleJobFilter};
pub use memory::MemoryJobStorage;
pub use retry::RetryCadence;
pub use scheduler::{JobEnqueuer, JobScheduler, JobSchedulerBuilder, QueueOptions, SchedulerHandle};
pub use scope::{ExecutionScope, GlobalScope};
pub use storage::{JobStorageProvider, StorageError};
pub use types::{JobId, JobRecord, JobRecordParts, TrackingId};

pub use bincode::{Decode, Encode};
pub use tokio_util::sync::CancellationToken;
