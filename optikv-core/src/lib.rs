//! OPTIKV Core - Data Types
//!
//! Pure data structures with no behavior. The storage crate depends on this.
//! This crate contains ONLY data types and the error taxonomy - no I/O.

pub mod error;
pub mod record;
pub mod schema;

pub use error::{BackendError, BackendResult, CacheError, CacheResult};
pub use record::{now_millis, CacheEntry, DurationMs, PendingWrite, StoredRecord, NEVER_EXPIRES};
pub use schema::DefaultSchema;
