use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a single job record. Assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates one or more jobs of the same command type, so a client can poll
/// or cancel them together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(Uuid);

impl TrackingId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted unit of deferred work: an encoded command plus the metadata the
/// scheduler needs to decide when it runs.
///
/// `id` and `is_complete` are private so that the identifier never changes and
/// completion can only go from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    id: JobId,
    /// Name of the command type; every record of one command type shares it.
    pub queue_id: String,
    pub tracking_id: Option<TrackingId>,
    /// Command value encoded with bincode's standard configuration.
    pub command: Bytes,
    pub execute_after: DateTime<Utc>,
    pub expire_on: DateTime<Utc>,
    is_complete: bool,
    /// Number of failed attempts recorded by the storage provider.
    pub failure_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        queue_id: impl Into<String>,
        command: impl Into<Bytes>,
        execute_after: DateTime<Utc>,
        expire_on: DateTime<Utc>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            queue_id: queue_id.into(),
            tracking_id: None,
            command: command.into(),
            execute_after,
            expire_on,
            is_complete: false,
            failure_count: 0,
            enqueued_at,
        }
    }

    pub fn with_tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Flip the completion flag. Calling it again is a no-op.
    pub fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    /// Eligible for a batch fetch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_complete && self.execute_after <= now && now <= self.expire_on
    }

    /// Incomplete and past its expiry.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        !self.is_complete && self.expire_on < now
    }

    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        self.is_complete || self.is_stale(now)
    }

    pub fn into_parts(self) -> JobRecordParts {
        JobRecordParts {
            id: self.id,
            queue_id: self.queue_id,
            tracking_id: self.tracking_id,
            command: self.command,
            execute_after: self.execute_after,
            expire_on: self.expire_on,
            is_complete: self.is_complete,
            failure_count: self.failure_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Field-by-field view of a [`JobRecord`], for backends that map records onto
/// rows or columns instead of serializing them whole.
#[derive(Debug, Clone)]
pub struct JobRecordParts {
    pub id: JobId,
    pub queue_id: String,
    pub tracking_id: Option<TrackingId>,
    pub command: Bytes,
    pub execute_after: DateTime<Utc>,
    pub expire_on: DateTime<Utc>,
    pub is_complete: bool,
    pub failure_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl From<JobRecordParts> for JobRecord {
    fn from(parts: JobRecordParts) -> Self {
        Self {
            id: parts.id,
            queue_id: parts.queue_id,
            tracking_id: parts.tracking_id,
            command: parts.command,
            execute_after: parts.execute_after,
            expire_on: parts.expire_on,
            is_complete: parts.is_complete,
            failure_count: parts.failure_count,
            enqueued_at: parts.enqueued_at,
        }
    }
}
