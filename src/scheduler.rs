use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{
    clock::{Clock, SystemClock},
    command::{Command, CommandHandler},
    config::{CommandLimits, JobQueueConfig},
    coordinator::{BatchReport, ExecutionCoordinator},
    error::{ConfigError, QueueError, ResolveError},
    poller,
    registry::HandlerRegistry,
    scope::{ExecutionScope, GlobalScope},
    storage::{JobStorageProvider, StorageError},
    sweeper,
    types::{JobId, JobRecord, TrackingId},
};

/// State shared by the pollers, the sweeper and every enqueuer.
pub(crate) struct SchedulerInner {
    pub(crate) storage: Arc<dyn JobStorageProvider>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) coordinator: ExecutionCoordinator,
    pub(crate) config: JobQueueConfig,
    pub(crate) clock: Arc<dyn Clock>,
    signals: HashMap<&'static str, Arc<Notify>>,
    bincode_config: bincode::config::Configuration,
}

pub struct JobSchedulerBuilder {
    storage: Arc<dyn JobStorageProvider>,
    registry: HandlerRegistry,
    global: GlobalScope,
    config: JobQueueConfig,
    limits: HashMap<String, CommandLimits>,
    clock: Arc<dyn Clock>,
}

impl JobSchedulerBuilder {
    pub fn config(mut self, config: JobQueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a process-wide service that handlers can resolve.
    pub fn service<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.global.insert(service);
        self
    }

    pub fn service_arc<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.global.insert_arc(service);
        self
    }

    /// Build a fresh handler for every job attempt from that attempt's scope.
    pub fn register_scoped<C, H, F>(mut self, factory: F) -> Self
    where
        C: Command,
        H: CommandHandler<C>,
        F: Fn(&ExecutionScope) -> Result<H, ResolveError> + Send + Sync + 'static,
    {
        self.registry.register_scoped::<C, H, F>(factory);
        self
    }

    /// Share one handler instance across all job attempts.
    pub fn register_singleton<C, H>(mut self, handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.registry.register_singleton::<C, H>(handler);
        self
    }

    /// Override batch size, concurrency or time limit for one command type.
    /// Takes precedence over `[commands.*]` entries of the config.
    pub fn limits_for<C: Command>(mut self, limits: CommandLimits) -> Self {
        self.limits.insert(C::name().to_string(), limits);
        self
    }

    pub fn build(self) -> Result<JobScheduler, ConfigError> {
        let mut config = self.config;
        config.commands.extend(self.limits);
        config.validate()?;

        if self.registry.command_names().next().is_none() {
            return Err(ConfigError::Invalid("no command handlers registered".into()));
        }

        let signals = self
            .registry
            .command_names()
            .map(|name| (name, Arc::new(Notify::new())))
            .collect();

        let registry = Arc::new(self.registry);
        let coordinator = ExecutionCoordinator::new(
            Arc::clone(&self.storage),
            Arc::clone(&registry),
            Arc::new(self.global),
        );

        Ok(JobScheduler {
            inner: Arc::new(SchedulerInner {
                storage: self.storage,
                registry,
                coordinator,
                config,
                clock: self.clock,
                signals,
                bincode_config: bincode::config::standard(),
            }),
        })
    }
}

/// Owns the handler registry and storage provider, and runs the pollers and
/// the purge sweeper.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn builder(storage: Arc<dyn JobStorageProvider>) -> JobSchedulerBuilder {
        JobSchedulerBuilder {
            storage,
            registry: HandlerRegistry::default(),
            global: GlobalScope::new(),
            config: JobQueueConfig::default(),
            limits: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn enqueuer(&self) -> JobEnqueuer {
        JobEnqueuer {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.inner.config
    }

    /// Names of the registered command types.
    pub fn commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.inner.registry.command_names().collect();
        names.sort_unstable();
        names
    }

    /// Run one fetch-execute-acknowledge cycle for a command type.
    pub async fn run_poll_cycle(&self, queue_id: &str) -> Result<BatchReport, StorageError> {
        poller::run_poll_cycle(&self.inner, queue_id, &CancellationToken::new()).await
    }

    pub async fn poll_once<C: Command>(&self) -> Result<BatchReport, StorageError> {
        self.run_poll_cycle(C::name()).await
    }

    pub async fn purge_stale_jobs(&self) -> Result<(), StorageError> {
        sweeper::purge_once(&self.inner, &CancellationToken::new()).await
    }

    /// Spawn one poller per registered command type plus the purge sweeper.
    /// They run until `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> SchedulerHandle {
        let mut tasks = Vec::new();

        for (&queue_id, signal) in &self.inner.signals {
            tasks.push(tokio::spawn(poller::run(
                Arc::clone(&self.inner),
                queue_id,
                Arc::clone(signal),
                shutdown.clone(),
            )));
        }
        tasks.push(tokio::spawn(sweeper::run(
            Arc::clone(&self.inner),
            shutdown.clone(),
        )));

        info!(commands = self.inner.signals.len(), "job scheduler started");

        SchedulerHandle { shutdown, tasks }
    }
}

/// Running pollers and sweeper.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop fetching, let in-flight jobs and purges finish, and wait for all
    /// tasks to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::error!(%error, "scheduler task ended abnormally");
            }
        }
        info!("job scheduler stopped");
    }
}

/// Scheduling options for a queued job.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Not eligible before this time. Defaults to now.
    pub execute_after: Option<DateTime<Utc>>,
    /// Stale after this time. Defaults to `execute_after` plus the configured
    /// default expiry.
    pub expire_on: Option<DateTime<Utc>>,
    pub tracking_id: Option<TrackingId>,
}

impl QueueOptions {
    pub fn execute_after(mut self, at: DateTime<Utc>) -> Self {
        self.execute_after = Some(at);
        self
    }

    pub fn expire_on(mut self, at: DateTime<Utc>) -> Self {
        self.expire_on = Some(at);
        self
    }

    pub fn tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }
}

/// Producer-side entry point. Cheap to clone; hand one to anything that
/// queues work.
#[derive(Clone)]
pub struct JobEnqueuer {
    inner: Arc<SchedulerInner>,
}

impl JobEnqueuer {
    pub async fn queue_job<C: Command>(&self, command: &C) -> Result<JobId, QueueError> {
        self.queue_job_with(command, QueueOptions::default()).await
    }

    #[instrument(skip_all, err, fields(command = C::name(), payload_size))]
    pub async fn queue_job_with<C: Command>(
        &self,
        command: &C,
        options: QueueOptions,
    ) -> Result<JobId, QueueError> {
        let name = C::name();
        if !self.inner.registry.contains(name) {
            return Err(QueueError::NotRegistered(name.to_string()));
        }

        let now = self.inner.clock.now();
        let execute_after = options.execute_after.unwrap_or(now);
        let expire_on = match options.expire_on {
            Some(expire_on) => expire_on,
            None => self
                .inner
                .config
                .default_expiry()
                .and_then(|expiry| execute_after.checked_add_signed(expiry))
                .ok_or(QueueError::InvalidSchedule)?,
        };
        if expire_on <= execute_after {
            return Err(QueueError::InvalidSchedule);
        }

        let payload = bincode::encode_to_vec(command, self.inner.bincode_config)?;
        tracing::Span::current().record("payload_size", payload.len());

        let mut record = JobRecord::new(name, payload, execute_after, expire_on, now);
        if let Some(tracking_id) = options.tracking_id {
            record = record.with_tracking_id(tracking_id);
        }
        let id = record.id();

        self.inner
            .storage
            .store_job(record, &CancellationToken::new())
            .await?;

        if let Some(signal) = self.inner.signals.get(name) {
            signal.notify_one();
        }

        Ok(id)
    }

    /// Stop every incomplete job queued under `tracking_id` from running.
    pub async fn cancel_job(&self, tracking_id: TrackingId) -> Result<(), QueueError> {
        self.inner
            .storage
            .cancel_job(tracking_id, &CancellationToken::new())
            .await?;
        Ok(())
    }
}
