//! Coalescing write queue with explicit debounce state.
//!
//! The queue owns the pending-write map and a monotonically increasing
//! debounce generation. Every enqueue replaces the key's pending write
//! and bumps the generation; a flush timer captured an older generation
//! becomes a no-op when it fires. That gives trailing-edge debounce with
//! no leading-edge execution and no implicit global timer.

use std::collections::HashMap;
use std::time::Duration;

use optikv_core::PendingWrite;
use serde_json::Value;

/// Pending writes awaiting a debounced flush, at most one per key.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: HashMap<String, PendingWrite>,
    generation: u64,
    flush_cycles: u64,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest write for `key`, replacing any prior pending
    /// write, and re-arm the debounce window.
    ///
    /// Returns the new generation; a timer that sleeps the debounce delay
    /// should flush only if its generation is still current when it wakes.
    pub fn enqueue(&mut self, key: impl Into<String>, ttl: Duration, value: Value) -> u64 {
        self.pending.insert(key.into(), PendingWrite { ttl, value });
        self.bump_generation()
    }

    /// Invalidate any armed timer without touching pending writes.
    ///
    /// Used when a flush is forced so the debounced flush does not run a
    /// second time over an empty queue.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Whether `generation` is still the latest armed window.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Drop the pending write for `key` (used by delete).
    pub fn remove(&mut self, key: &str) -> Option<PendingWrite> {
        self.pending.remove(key)
    }

    /// Drain every pending write for dispatch and start a new flush cycle.
    ///
    /// Writes enqueued after this call land in the next cycle, so nothing
    /// enqueued during an in-flight dispatch is lost.
    pub fn take_pending(&mut self) -> HashMap<String, PendingWrite> {
        self.flush_cycles += 1;
        std::mem::take(&mut self.pending)
    }

    /// Number of completed/started flush cycles.
    pub fn flush_cycles(&self) -> u64 {
        self.flush_cycles
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
