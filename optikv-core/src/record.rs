//! Record and cache-entry types shared between the cache and its backends.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Duration in milliseconds for TTL and expiry values.
pub type DurationMs = i64;

/// Sentinel expiry meaning "never expires".
pub const NEVER_EXPIRES: DurationMs = 0;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> DurationMs {
    Utc::now().timestamp_millis()
}

/// One logical record as persisted by a backend: the latest value for a
/// key together with its absolute expiry timestamp (epoch millis, `0` =
/// never expires).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub value: Value,
    pub expires_at: DurationMs,
}

impl StoredRecord {
    pub fn new(key: impl Into<String>, value: Value, expires_at: DurationMs) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at,
        }
    }

    /// Whether this record's TTL has elapsed as of `now`.
    pub fn is_expired(&self, now: DurationMs) -> bool {
        self.expires_at != NEVER_EXPIRES && self.expires_at <= now
    }
}

/// In-memory cache slot for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: DurationMs,
}

impl CacheEntry {
    /// Build an entry from a value and a TTL, anchored at `now`.
    ///
    /// A zero TTL produces a never-expiring entry.
    pub fn with_ttl(value: Value, ttl: Duration, now: DurationMs) -> Self {
        let expires_at = if ttl.is_zero() {
            NEVER_EXPIRES
        } else {
            now + ttl.as_millis() as DurationMs
        };
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: DurationMs) -> bool {
        self.expires_at != NEVER_EXPIRES && self.expires_at <= now
    }
}

/// The most recent not-yet-persisted write for a key.
///
/// At most one pending write exists per key: a newer write for the same
/// key replaces the older one rather than appending (coalescing).
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub ttl: Duration,
    pub value: Value,
}
