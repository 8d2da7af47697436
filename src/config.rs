use std::{collections::HashMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Scheduler settings. Every field has a default, so a TOML file only needs
/// to list what it overrides:
///
/// ```toml
/// batch_size = 50
/// poll_interval_ms = 250
///
/// [commands.send_email]
/// execution_time_limit_ms = 30000
/// max_concurrency = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQueueConfig {
    /// Records fetched per storage round-trip.
    pub batch_size: usize,
    /// Jobs of one command type executing at the same time.
    pub max_concurrency: usize,
    /// Wait after an empty batch, unless a job is queued sooner.
    pub poll_interval_ms: u64,
    /// Wait after a failed storage call before polling again.
    pub storage_error_backoff_ms: u64,
    pub purge_interval_secs: u64,
    /// Default lifetime of a queued job when the producer gives no expiry.
    pub default_expiry_secs: u64,
    /// Time limit for commands without their own; `None` means unbounded.
    pub execution_time_limit_ms: Option<u64>,
    /// Per-command overrides, keyed by command name.
    pub commands: HashMap<String, CommandLimits>,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 4,
            poll_interval_ms: 1_000,
            storage_error_backoff_ms: 5_000,
            purge_interval_secs: 60 * 60,
            default_expiry_secs: 4 * 60 * 60,
            execution_time_limit_ms: None,
            commands: HashMap::new(),
        }
    }
}

/// Limits for a single command type. Unset fields fall back to the
/// scheduler-wide values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandLimits {
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub execution_time_limit_ms: Option<u64>,
}

impl CommandLimits {
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.execution_time_limit_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}

/// Limits of one command type after falling back to scheduler-wide values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub execution_time_limit: Option<Duration>,
}

impl JobQueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_count("batch_size", self.batch_size)?;
        check_count("max_concurrency", self.max_concurrency)?;
        check_millis("poll_interval_ms", self.poll_interval_ms)?;
        check_millis("storage_error_backoff_ms", self.storage_error_backoff_ms)?;
        check_secs("purge_interval_secs", self.purge_interval_secs)?;
        check_secs("default_expiry_secs", self.default_expiry_secs)?;
        if let Some(limit) = self.execution_time_limit_ms {
            check_millis("execution_time_limit_ms", limit)?;
        }

        for (name, limits) in &self.commands {
            let scoped = |field: &str| format!("commands.{name}.{field}");
            if let Some(size) = limits.batch_size {
                check_count(&scoped("batch_size"), size)?;
            }
            if let Some(max) = limits.max_concurrency {
                check_count(&scoped("max_concurrency"), max)?;
            }
            if let Some(limit) = limits.execution_time_limit_ms {
                check_millis(&scoped("execution_time_limit_ms"), limit)?;
            }
        }
        Ok(())
    }

    pub fn limits_for(&self, command: &str) -> EffectiveLimits {
        let own = self.commands.get(command).copied().unwrap_or_default();
        EffectiveLimits {
            batch_size: own.batch_size.unwrap_or(self.batch_size),
            max_concurrency: own.max_concurrency.unwrap_or(self.max_concurrency),
            execution_time_limit: own
                .execution_time_limit_ms
                .or(self.execution_time_limit_ms)
                .map(Duration::from_millis),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn storage_error_backoff(&self) -> Duration {
        Duration::from_millis(self.storage_error_backoff_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    /// `None` when the configured expiry does not fit a `chrono::Duration`,
    /// which `validate` rules out.
    pub fn default_expiry(&self) -> Option<chrono::Duration> {
        chrono::Duration::from_std(Duration::from_secs(self.default_expiry_secs)).ok()
    }
}

/// Upper bound for every interval and expiry setting: 100 years.
const MAX_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn check_count(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
    }
    Ok(())
}

fn check_secs(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_SECS {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 1 and {MAX_SECS}"
        )));
    }
    Ok(())
}

fn check_millis(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_SECS * 1_000 {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 1 and {}",
            MAX_SECS * 1_000
        )));
    }
    Ok(())
}
