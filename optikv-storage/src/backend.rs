//! Backend adapter trait and one-shot engine selection.
//!
//! The cache talks to persistence through [`StoreBackend`], a narrow
//! object-safe interface. Two realizations ship with the crate: the
//! structured LMDB engine (preferred) and a flat string-keyed file store
//! used when LMDB cannot be opened in the current environment.
//!
//! Availability is probed exactly once, at cache construction; the chosen
//! backend is an immutable property of the cache instance and is never
//! switched at runtime.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use optikv_core::{BackendResult, StoredRecord};
use tracing::warn;

use crate::flat_file::FlatFileBackend;
use crate::lmdb_backend::LmdbBackend;

/// Reserved record key under which the known-key set is persisted.
///
/// Backends store it like any other record; cache-level enumeration and
/// sweeping skip it.
pub const KNOWN_KEYS_KEY: &str = "__optikv.known_keys";

/// Whether a record key is reserved for cache bookkeeping.
pub fn is_reserved_key(key: &str) -> bool {
    key == KNOWN_KEYS_KEY
}

/// What the cache requires from its persistence environment.
///
/// All operations are best-effort from the cache's point of view: errors
/// returned here are absorbed at the call site, logged, and converted to
/// "absent" results. Implementations must be thread-safe.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fetch the record for `key`, or `None` if absent.
    ///
    /// A corrupt stored payload is a miss: implementations log it, remove
    /// the original bytes, and return `Ok(None)`.
    async fn get(&self, key: &str) -> BackendResult<Option<StoredRecord>>;

    /// Persist a batch of records in one round-trip, overwriting any
    /// existing record per key.
    async fn put_batch(&self, records: Vec<StoredRecord>) -> BackendResult<()>;

    /// Remove the record for `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Enumerate every stored record, including reserved bookkeeping
    /// records.
    async fn list_all(&self) -> BackendResult<Vec<StoredRecord>>;
}

/// Which backend realization a cache instance ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The structured LMDB engine.
    Lmdb,
    /// The flat string-keyed fallback store.
    FlatFile,
    /// A caller-supplied implementation.
    Custom,
}

/// Backend preference expressed in the cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// Probe LMDB first, degrade to the flat store if it is unavailable.
    #[default]
    Auto,
    /// Require LMDB; opening fails if it is unavailable.
    Lmdb,
    /// Use the flat file store unconditionally.
    FlatFile,
}

/// Probe and open a backend for `db_name` under `data_dir`.
///
/// With [`BackendChoice::Auto`] this performs the one-shot capability
/// check: if the LMDB environment cannot be opened the failure is logged
/// once and the flat store takes over. The returned kind is immutable for
/// the life of the cache.
pub async fn open_backend(
    data_dir: &Path,
    db_name: &str,
    choice: BackendChoice,
) -> BackendResult<(Arc<dyn StoreBackend>, BackendKind)> {
    match choice {
        BackendChoice::Lmdb => {
            let backend = LmdbBackend::open(data_dir, db_name)?;
            Ok((Arc::new(backend), BackendKind::Lmdb))
        }
        BackendChoice::FlatFile => {
            let backend = FlatFileBackend::open(data_dir, db_name).await?;
            Ok((Arc::new(backend), BackendKind::FlatFile))
        }
        BackendChoice::Auto => match LmdbBackend::open(data_dir, db_name) {
            Ok(backend) => Ok((Arc::new(backend), BackendKind::Lmdb)),
            Err(err) => {
                warn!(
                    db_name,
                    error = %err,
                    "structured engine unavailable, falling back to flat file store"
                );
                let backend = FlatFileBackend::open(data_dir, db_name).await?;
                Ok((Arc::new(backend), BackendKind::FlatFile))
            }
        },
    }
}
