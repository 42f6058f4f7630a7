//! The write-coalescing, TTL-aware cache layer.
//!
//! Three pieces with one lock between them:
//!
//! - [`ValueCache`]: in-memory map serving reads synchronously, with lazy
//!   expiry and a coarse growth guard.
//! - [`WriteQueue`]: coalescing pending-write map plus the debounce
//!   generation that drives the trailing-edge flush timer.
//! - [`WriteBackCache`]: the public surface tying both to a
//!   [`StoreBackend`](crate::backend::StoreBackend), with the expiration
//!   sweep and the shallow-merge operator on top.

pub mod value_cache;
pub mod write_back;
pub mod write_queue;

pub use value_cache::{ValueCache, COMPACT_EVERY_FLUSHES, MAX_RESIDENT_ENTRIES};
pub use write_back::{
    CacheConfig, ValueTransform, WriteBackCache, DEFAULT_OPTIMISTIC_DELAY_MS, SWEEP_COOLDOWN,
};
pub use write_queue::WriteQueue;
