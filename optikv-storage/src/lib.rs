//! OPTIKV Storage - Backends and the Write-Back Cache
//!
//! A client-side key/value cache in front of a slow asynchronous store:
//! reads are served from memory, writes are coalesced per key and flushed
//! in debounced batches, and TTL expiry is enforced lazily plus by a
//! cooldown-gated sweep.
//!
//! ```ignore
//! use optikv_storage::{CacheConfig, WriteBackCache};
//! use serde_json::json;
//!
//! let cache = WriteBackCache::open(
//!     CacheConfig::new("settings").with_defaults(json!({ "theme": "dark" })),
//! )
//! .await?;
//!
//! cache.set("theme", json!("light"));
//! assert_eq!(cache.get("theme").await, json!("light"));   // before any flush
//! assert_eq!(cache.get("missing").await, json!(null));
//! ```

pub mod backend;
pub mod cache;
pub mod flat_file;
pub mod lmdb_backend;

pub use backend::{
    is_reserved_key, open_backend, BackendChoice, BackendKind, StoreBackend, KNOWN_KEYS_KEY,
};
pub use cache::{CacheConfig, ValueTransform, WriteBackCache};
pub use flat_file::FlatFileBackend;
pub use lmdb_backend::LmdbBackend;

// Re-export the core types callers need to use the public surface.
pub use optikv_core::{
    BackendError, BackendResult, CacheError, CacheResult, DefaultSchema, StoredRecord,
};
