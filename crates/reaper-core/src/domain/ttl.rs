//! TTL values and expiration arithmetic.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TtlError {
    #[error("TTL value {0} is not an integer or numeric string")]
    NotAnInteger(String),

    #[error("TTL value {0} is negative")]
    Negative(i64),
}

/// A validated, non-negative number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtlSeconds(i64);

impl TtlSeconds {
    pub fn new(seconds: i64) -> Result<Self, TtlError> {
        if seconds < 0 {
            return Err(TtlError::Negative(seconds));
        }
        Ok(Self(seconds))
    }

    /// Accepts a JSON integer or a string holding one. Floats, booleans,
    /// objects and non-numeric strings are rejected.
    pub fn from_value(value: &Value) -> Result<Self, TtlError> {
        let seconds = match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| TtlError::NotAnInteger(value.to_string()))?,
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| TtlError::NotAnInteger(value.to_string()))?,
            other => return Err(TtlError::NotAnInteger(other.to_string())),
        };
        Self::new(seconds)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    /// `None` for values beyond chrono's duration range.
    pub fn as_duration(self) -> Option<Duration> {
        Duration::try_seconds(self.0)
    }
}

/// `completed_at + ttl`, or `None` if it falls outside chrono's range.
pub fn expiration_instant(completed_at: DateTime<Utc>, ttl: TtlSeconds) -> Option<DateTime<Utc>> {
    ttl.as_duration()
        .and_then(|ttl| completed_at.checked_add_signed(ttl))
}

/// Whether a finished resource may be deleted at `now`.
///
/// A negative `ttl_seconds` is never eligible.
pub fn is_eligible(completed_at: DateTime<Utc>, ttl_seconds: i64, now: DateTime<Utc>) -> bool {
    TtlSeconds::new(ttl_seconds)
        .ok()
        .and_then(|ttl| expiration_instant(completed_at, ttl))
        .is_some_and(|expires_at| has_expired(expires_at, now))
}

/// The deletion rule: due once `now` reaches the expiration instant.
pub fn has_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}
