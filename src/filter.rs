//! Match descriptors handed to a [`JobStorageProvider`](crate::JobStorageProvider).
//!
//! Backends translate these into their own query language. `matches` is the
//! reference evaluation; translated queries must select the same records.
//! `Display` renders a readable form for logs, not a query to execute.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::JobRecord;

/// Selects records of one command type that are due at `now`:
/// `queue_id == self.queue_id AND !is_complete AND execute_after <= now AND now <= expire_on`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJobFilter {
    pub queue_id: String,
    pub now: DateTime<Utc>,
}

impl PendingJobFilter {
    pub fn new(queue_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            queue_id: queue_id.into(),
            now,
        }
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        job.queue_id == self.queue_id && job.is_due(self.now)
    }
}

impl fmt::Display for PendingJobFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queue_id = {:?} and not is_complete and execute_after <= {now} and expire_on >= {now}",
            self.queue_id,
            now = self.now.to_rfc3339()
        )
    }
}

/// Selects records that may be purged: `is_complete OR expire_on < now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleJobFilter {
    pub now: DateTime<Utc>,
}

impl StaleJobFilter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        job.is_purgeable(self.now)
    }
}

impl fmt::Display for StaleJobFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "is_complete or expire_on < {}",
            self.now.to_rfc3339()
        )
    }
}
