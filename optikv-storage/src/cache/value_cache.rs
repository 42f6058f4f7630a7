//! In-memory value cache with lazy expiry and a coarse growth guard.

use std::collections::HashMap;
use std::time::Duration;

use optikv_core::{CacheEntry, DurationMs};
use serde_json::Value;
use tracing::debug;

/// Run the growth guard on every Nth flush cycle.
pub const COMPACT_EVERY_FLUSHES: u64 = 200;

/// Hard ceiling on resident entries. When a compaction pass still leaves
/// more than this many entries, the whole map is cleared: a memory bound,
/// not a recency policy.
pub const MAX_RESIDENT_ENTRIES: usize = 500;

/// Authoritative in-memory map from key to the most recently written
/// value, until evicted or expired.
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: HashMap<String, CacheEntry>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key` if present and unexpired.
    ///
    /// An expired entry is evicted as a side effect and reads as absent.
    pub fn get_fresh(&mut self, key: &str, now: DurationMs) -> Option<CacheEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Store a value with a TTL anchored at `now`, overwriting any
    /// existing entry.
    pub fn put(&mut self, key: impl Into<String>, value: Value, ttl: Duration, now: DurationMs) {
        self.entries
            .insert(key.into(), CacheEntry::with_ttl(value, ttl, now));
    }

    /// Store an already-built entry (repopulation from the backend).
    pub fn insert_entry(&mut self, key: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Remove the entry regardless of expiry state.
    pub fn evict(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep_expired(&mut self, now: DurationMs) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Growth guard, invoked once per flush cycle.
    ///
    /// Every [`COMPACT_EVERY_FLUSHES`] cycles, sweep expired entries; if
    /// more than [`MAX_RESIDENT_ENTRIES`] survive, clear the whole map.
    pub fn maybe_compact(&mut self, flush_cycle: u64, now: DurationMs) {
        if flush_cycle == 0 || flush_cycle % COMPACT_EVERY_FLUSHES != 0 {
            return;
        }
        let swept = self.sweep_expired(now);
        if self.entries.len() > MAX_RESIDENT_ENTRIES {
            debug!(
                swept,
                resident = self.entries.len(),
                "value cache over ceiling after sweep, clearing"
            );
            self.entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_then_get_fresh() {
        let mut cache = ValueCache::new();
        cache.put("k", json!("v"), Duration::ZERO, 1_000);

        let entry = cache.get_fresh("k", 999_999).expect("entry should be fresh");
        assert_eq!(entry.value, json!("v"));
    }

    #[test]
    fn test_expired_entry_reads_absent_and_is_evicted() {
        let mut cache = ValueCache::new();
        cache.put("k", json!("v"), Duration::from_millis(100), 1_000);

        assert!(cache.get_fresh("k", 1_050).is_some());
        assert!(cache.get_fresh("k", 1_100).is_none());
        // The eviction is a side effect of the expired read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let mut cache = ValueCache::new();
        cache.put("k", json!(1), Duration::from_millis(10), 1_000);
        cache.put("k", json!(2), Duration::ZERO, 1_000);

        let entry = cache.get_fresh("k", 5_000).expect("entry should be fresh");
        assert_eq!(entry.value, json!(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_expired() {
        let mut cache = ValueCache::new();
        cache.put("live", json!(1), Duration::ZERO, 1_000);
        cache.put("dead", json!(2), Duration::from_millis(1), 1_000);

        assert_eq!(cache.sweep_expired(2_000), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_fresh("live", 2_000).is_some());
    }

    #[test]
    fn test_compact_only_on_cycle_boundary() {
        let mut cache = ValueCache::new();
        for i in 0..(MAX_RESIDENT_ENTRIES + 1) {
            cache.put(format!("k{i}"), json!(i), Duration::ZERO, 1_000);
        }

        cache.maybe_compact(COMPACT_EVERY_FLUSHES - 1, 2_000);
        assert_eq!(cache.len(), MAX_RESIDENT_ENTRIES + 1);

        cache.maybe_compact(COMPACT_EVERY_FLUSHES, 2_000);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compact_prefers_sweeping_over_clearing() {
        let mut cache = ValueCache::new();
        for i in 0..MAX_RESIDENT_ENTRIES {
            cache.put(format!("live{i}"), json!(i), Duration::ZERO, 1_000);
        }
        for i in 0..50 {
            cache.put(format!("dead{i}"), json!(i), Duration::from_millis(1), 1_000);
        }

        // Sweeping gets the count back under the ceiling, so the live
        // entries survive.
        cache.maybe_compact(COMPACT_EVERY_FLUSHES, 2_000);
        assert_eq!(cache.len(), MAX_RESIDENT_ENTRIES);
    }
}
