//! Rescheduling policy applied by a storage provider when a job attempt fails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far to push `execute_after` after a failed attempt.
///
/// `Immediate` leaves the record eligible for the very next poll. The other
/// variants de-prioritize failing jobs so that siblings in the same queue can
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryCadence {
    #[default]
    Immediate,
    Fixed {
        #[serde(rename = "delay_ms")]
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// `base * 2^(failures - 1)`, capped at `max`.
    Exponential {
        #[serde(rename = "base_ms")]
        #[serde(with = "millis")]
        base: Duration,
        #[serde(rename = "max_ms")]
        #[serde(with = "millis")]
        max: Duration,
    },
}

impl RetryCadence {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential { base, max }
    }

    /// Delay after the `failure_count`-th failure (1-indexed).
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        match *self {
            RetryCadence::Immediate => Duration::ZERO,
            RetryCadence::Fixed { delay } => delay,
            RetryCadence::Exponential { base, max } => {
                if failure_count == 0 {
                    return Duration::ZERO;
                }
                let shift = (failure_count - 1).min(31);
                base.checked_mul(1u32 << shift).unwrap_or(max).min(max)
            }
        }
    }

    /// Saturates at the latest representable time when the delay overflows.
    pub fn next_execute_after(&self, now: DateTime<Utc>, failure_count: u32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay_for(failure_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
