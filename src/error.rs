use std::{error::Error as StdError, fmt, sync::Arc};

use crate::storage::StorageError;

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Why a single job attempt did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The handler returned an error.
    Handler,
    /// The handler exceeded its execution time limit and was cancelled.
    TimedOut,
    /// No handler could be resolved for the command.
    Resolution,
    /// The stored payload could not be decoded into the command type.
    Decode,
    /// The handler panicked.
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Handler => "handler error",
            FailureKind::TimedOut => "execution time limit exceeded",
            FailureKind::Resolution => "handler resolution failed",
            FailureKind::Decode => "command decoding failed",
            FailureKind::Panicked => "handler panicked",
        };
        f.write_str(s)
    }
}

/// Failure descriptor handed to
/// [`JobStorageProvider::on_handler_execution_failure`](crate::JobStorageProvider::on_handler_execution_failure).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    #[source]
    cause: Option<Cause>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn handler(error: anyhow::Error) -> Self {
        let message = format!("{error:#}");
        let cause: Box<dyn StdError + Send + Sync> = error.into();
        Self {
            kind: FailureKind::Handler,
            message,
            cause: Some(Arc::from(cause)),
        }
    }

    pub fn timed_out(limit: std::time::Duration) -> Self {
        Self::new(
            FailureKind::TimedOut,
            format!("cancelled after {} ms", limit.as_millis()),
        )
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Panicked, message)
    }

    pub fn decode(error: bincode::error::DecodeError) -> Self {
        Self::new(FailureKind::Decode, error.to_string()).with_cause(error)
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Cancellation-kind failures come from the execution time limit.
    pub fn is_cancellation(&self) -> bool {
        self.kind == FailureKind::TimedOut
    }
}

impl From<ResolveError> for JobFailure {
    fn from(error: ResolveError) -> Self {
        Self::new(FailureKind::Resolution, error.to_string()).with_cause(error)
    }
}

/// Failure to locate or construct a handler or a service it depends on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("no handler registered for command `{0}`")]
    NotRegistered(String),
    #[error("service `{0}` is not registered in this scope")]
    MissingService(&'static str),
    #[error("failed to construct `{type_name}`: {reason}")]
    Construction {
        type_name: &'static str,
        reason: String,
    },
}

/// Errors returned to producers enqueueing or cancelling jobs.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("no handler registered for command `{0}`")]
    NotRegistered(String),
    #[error("job expires at or before it becomes eligible, or its expiry is out of range")]
    InvalidSchedule,
    #[error("failed to encode command: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Invalid or unreadable scheduler configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_failure_keeps_cause_chain() {
        let error = anyhow::anyhow!("smtp refused").context("sending welcome mail");
        let failure = JobFailure::handler(error);

        assert_eq!(failure.kind, FailureKind::Handler);
        assert!(failure.message.contains("sending welcome mail"));
        assert!(failure.message.contains("smtp refused"));
        assert!(failure.cause().is_some());
        assert!(!failure.is_cancellation());
    }

    #[test]
    fn resolution_errors_become_resolution_failures() {
        let failure: JobFailure = ResolveError::MissingService("Mailer").into();
        assert_eq!(failure.kind, FailureKind::Resolution);
        assert!(failure.to_string().contains("Mailer"));
    }
}
