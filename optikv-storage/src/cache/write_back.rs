//! Write-back cache public surface.
//!
//! `WriteBackCache` makes reads feel synchronous and coalesces writes:
//! a write lands in the in-memory value cache immediately (so a read
//! issued right after observes it), while persistence happens later in a
//! single debounced batch. Expired records are evicted lazily on access
//! and eagerly by a cooldown-gated sweep.
//!
//! The backing store is selected once at construction and never switched;
//! every backend failure after that point is absorbed, logged, and
//! converted into an "absent" result. The only error a data operation can
//! return is a merge on a non-object value.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use optikv_core::{
    now_millis, CacheEntry, CacheError, CacheResult, DefaultSchema, DurationMs, StoredRecord,
    NEVER_EXPIRES,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backend::{
    is_reserved_key, open_backend, BackendChoice, BackendKind, StoreBackend, KNOWN_KEYS_KEY,
};
use crate::cache::value_cache::ValueCache;
use crate::cache::write_queue::WriteQueue;

/// Default debounce window for the flush scheduler, in milliseconds.
pub const DEFAULT_OPTIMISTIC_DELAY_MS: u64 = 500;

/// Minimum interval between two non-forced expiration sweeps.
pub const SWEEP_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Pure value transform applied on the way into or out of the backend.
///
/// Transforms must be idempotent with respect to repeated application and
/// must not depend on cache state.
pub type ValueTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Configuration for a [`WriteBackCache`] instance.
#[derive(Clone)]
pub struct CacheConfig {
    /// Logical database name; also names the on-disk store.
    pub db_name: String,
    /// Directory holding backend data for all databases.
    pub data_dir: PathBuf,
    /// Default-value template; defines the schema for typed reads.
    pub default_value: DefaultSchema,
    /// Debounce window absorbing write bursts into one flush.
    pub optimistic_delay: Duration,
    /// Skip repopulating the value cache on backend reads.
    pub ignore_cache: bool,
    /// Backend preference (probe order).
    pub backend: BackendChoice,
    /// Transform applied to values before they reach the backend.
    pub set_format: Option<ValueTransform>,
    /// Transform applied to values read back from the backend.
    pub get_format: Option<ValueTransform>,
}

impl CacheConfig {
    /// Create a config with defaults: data under the system temp
    /// directory, a 500 ms debounce window, caching enabled.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            data_dir: std::env::temp_dir().join("optikv"),
            default_value: DefaultSchema::empty(),
            optimistic_delay: Duration::from_millis(DEFAULT_OPTIMISTIC_DELAY_MS),
            ignore_cache: false,
            backend: BackendChoice::Auto,
            set_format: None,
            get_format: None,
        }
    }

    /// Create a config honoring environment overrides.
    ///
    /// Environment variables:
    /// - `OPTIKV_DATA_DIR`: base directory for backend data
    /// - `OPTIKV_OPTIMISTIC_DELAY_MS`: debounce window in milliseconds
    pub fn from_env(db_name: impl Into<String>) -> Self {
        let mut config = Self::new(db_name);
        if let Ok(dir) = std::env::var("OPTIKV_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(delay) = std::env::var("OPTIKV_OPTIMISTIC_DELAY_MS") {
            if let Ok(millis) = delay.parse::<u64>() {
                config.optimistic_delay = Duration::from_millis(millis);
            }
        }
        config
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the default-value template.
    pub fn with_defaults(mut self, template: impl Into<DefaultSchema>) -> Self {
        self.default_value = template.into();
        self
    }

    /// Set the debounce window.
    pub fn with_optimistic_delay(mut self, delay: Duration) -> Self {
        self.optimistic_delay = delay;
        self
    }

    /// Disable value-cache repopulation on backend reads.
    pub fn with_ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    /// Set the backend preference.
    pub fn with_backend(mut self, backend: BackendChoice) -> Self {
        self.backend = backend;
        self
    }

    /// Set the transform applied before values reach the backend.
    pub fn with_set_format<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.set_format = Some(Arc::new(transform));
        self
    }

    /// Set the transform applied to values read from the backend.
    pub fn with_get_format<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.get_format = Some(Arc::new(transform));
        self
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("db_name", &self.db_name)
            .field("data_dir", &self.data_dir)
            .field("defaults", &self.default_value.len())
            .field("optimistic_delay", &self.optimistic_delay)
            .field("ignore_cache", &self.ignore_cache)
            .field("backend", &self.backend)
            .field("set_format", &self.set_format.is_some())
            .field("get_format", &self.get_format.is_some())
            .finish()
    }
}

/// Mutable cache state, guarded by one lock so a write call updates the
/// value cache and the write queue atomically.
struct CacheState {
    values: ValueCache,
    queue: WriteQueue,
    known_keys: BTreeSet<String>,
    keys_dirty: bool,
    last_sweep_ms: DurationMs,
}

struct Shared {
    db_name: String,
    defaults: DefaultSchema,
    optimistic_delay: Duration,
    ignore_cache: bool,
    set_format: Option<ValueTransform>,
    get_format: Option<ValueTransform>,
    backend: Arc<dyn StoreBackend>,
    kind: BackendKind,
    state: Mutex<CacheState>,
}

/// Write-back key/value cache over a slow asynchronous store.
///
/// Cheap to clone; all clones share one instance. Write operations must
/// run inside a Tokio runtime since they arm the debounced flush task.
#[derive(Clone)]
pub struct WriteBackCache {
    inner: Arc<Shared>,
}

impl WriteBackCache {
    /// Open a cache, probing and selecting a backend per the config.
    pub async fn open(config: CacheConfig) -> CacheResult<Self> {
        let (backend, kind) =
            open_backend(&config.data_dir, &config.db_name, config.backend).await?;
        Self::build(config, backend, kind).await
    }

    /// Open a cache over a caller-supplied backend.
    pub async fn with_backend(
        config: CacheConfig,
        backend: Arc<dyn StoreBackend>,
    ) -> CacheResult<Self> {
        Self::build(config, backend, BackendKind::Custom).await
    }

    async fn build(
        config: CacheConfig,
        backend: Arc<dyn StoreBackend>,
        kind: BackendKind,
    ) -> CacheResult<Self> {
        // Seed the known-key set from the persisted side index so
        // enumeration survives restarts.
        let known_keys = match backend.get(KNOWN_KEYS_KEY).await {
            Ok(Some(record)) => match record.value {
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(key) => Some(key),
                        _ => None,
                    })
                    .collect(),
                _ => {
                    warn!(db = %config.db_name, "known-key index has unexpected shape, rebuilding");
                    BTreeSet::new()
                }
            },
            Ok(None) => BTreeSet::new(),
            Err(err) => {
                warn!(db = %config.db_name, error = %err, "failed to load known-key index");
                BTreeSet::new()
            }
        };

        let cache = Self {
            inner: Arc::new(Shared {
                db_name: config.db_name,
                defaults: config.default_value,
                optimistic_delay: config.optimistic_delay,
                ignore_cache: config.ignore_cache,
                set_format: config.set_format,
                get_format: config.get_format,
                backend,
                kind,
                state: Mutex::new(CacheState {
                    values: ValueCache::new(),
                    queue: WriteQueue::new(),
                    known_keys,
                    keys_dirty: false,
                    last_sweep_ms: 0,
                }),
            }),
        };

        cache.spawn_sweep();
        Ok(cache)
    }

    /// Logical database name.
    pub fn db_name(&self) -> &str {
        &self.inner.db_name
    }

    /// Which backend realization this instance selected at construction.
    pub fn backend_kind(&self) -> BackendKind {
        self.inner.kind
    }

    /// Number of writes awaiting the next flush.
    pub fn pending_writes(&self) -> usize {
        self.state().queue.len()
    }

    /// Number of entries resident in the value cache.
    pub fn resident_entries(&self) -> usize {
        self.state().values.len()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Store a never-expiring value for `key`.
    pub fn set(&self, key: &str, value: Value) {
        self.set_ex(key, Duration::ZERO, value);
    }

    /// Store a value with a TTL (zero means never expires).
    ///
    /// The value cache is updated synchronously, so a `get` issued after
    /// this call returns observes the new value even before any flush.
    /// Persistence is debounced: bursts of writes collapse into one
    /// backend batch `optimistic_delay` after the last write.
    pub fn set_ex(&self, key: &str, ttl: Duration, value: Value) {
        let generation = {
            let mut state = self.state();
            if state.known_keys.insert(key.to_string()) {
                state.keys_dirty = true;
            }
            state.values.put(key, value.clone(), ttl, now_millis());
            state.queue.enqueue(key, ttl, value)
        };
        self.arm_flush_timer(generation);
    }

    /// Arm a trailing-edge debounce timer for `generation`.
    ///
    /// Every enqueue bumps the queue generation, so only the timer armed
    /// by the last write in a burst still matches when it wakes.
    fn arm_flush_timer(&self, generation: u64) {
        let cache = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cache.inner.optimistic_delay).await;
            cache.flush_gated(Some(generation)).await;
        });
    }

    async fn flush_now(&self) {
        self.flush_gated(None).await;
    }

    /// Drain the write queue and dispatch one backend batch.
    ///
    /// With a generation, the staleness check and the drain happen under
    /// one lock: a write enqueued after the timer was armed makes the
    /// timer stale before it can take the queue, so nothing is dispatched
    /// ahead of its own debounce window.
    ///
    /// Writes enqueued while the batch is in flight stay queued for the
    /// next cycle. A backend failure is logged and not retried; callers
    /// of `set`/`set_ex` already hold the value via the cache.
    async fn flush_gated(&self, generation: Option<u64>) {
        let now = now_millis();
        let (pending, keys_snapshot) = {
            let mut state = self.state();
            if let Some(generation) = generation {
                if !state.queue.is_current(generation) {
                    return;
                }
            }
            let pending = state.queue.take_pending();
            let cycle = state.queue.flush_cycles();
            state.values.maybe_compact(cycle, now);
            let keys_snapshot = if state.keys_dirty {
                state.keys_dirty = false;
                Some(known_keys_record(&state.known_keys))
            } else {
                None
            };
            (pending, keys_snapshot)
        };

        if pending.is_empty() && keys_snapshot.is_none() {
            return;
        }

        let mut records = Vec::with_capacity(pending.len() + 1);
        for (key, write) in pending {
            let value = match &self.inner.set_format {
                Some(transform) => transform(write.value),
                None => write.value,
            };
            let entry = CacheEntry::with_ttl(value, write.ttl, now);
            records.push(StoredRecord::new(key, entry.value, entry.expires_at));
        }
        if let Some(record) = keys_snapshot {
            records.push(record);
        }

        debug!(db = %self.inner.db_name, count = records.len(), "flushing batch");
        if let Err(err) = self.inner.backend.put_batch(records).await {
            warn!(
                db = %self.inner.db_name,
                error = %err,
                "flush failed; values remain served from memory"
            );
        }
    }

    /// Flush pending writes immediately, bypassing the debounce window.
    pub async fn flush_pending(&self) {
        // Invalidate armed timers so the debounced flush does not run a
        // second, empty cycle.
        self.state().queue.bump_generation();
        self.flush_now().await;
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Read the value for `key`.
    ///
    /// Never fails: a miss (including backend errors and expired records)
    /// resolves to a deep copy of the key's default, or `Value::Null`
    /// when the schema defines none.
    pub async fn get(&self, key: &str) -> Value {
        match self.get_opt(key).await {
            Some(value) => value,
            None => self.default_for(key),
        }
    }

    /// Read path without the default fallback.
    async fn get_opt(&self, key: &str) -> Option<Value> {
        let now = now_millis();
        if let Some(entry) = self.state().values.get_fresh(key, now) {
            return Some(entry.value);
        }

        // A miss funds the rate-limited sweep without blocking this read.
        self.spawn_sweep();

        let record = match self.inner.backend.get(key).await {
            Ok(record) => record?,
            Err(err) => {
                warn!(key, error = %err, "backend read failed, treating as absent");
                return None;
            }
        };

        if record.is_expired(now) {
            self.remove_everywhere(key).await;
            return None;
        }

        let value = match &self.inner.get_format {
            Some(transform) => transform(record.value),
            None => record.value,
        };
        if !self.inner.ignore_cache {
            self.state().values.insert_entry(
                key,
                CacheEntry {
                    value: value.clone(),
                    expires_at: record.expires_at,
                },
            );
        }
        Some(value)
    }

    /// Deep copy of the default for `key`, or `Null` if none is defined.
    fn default_for(&self, key: &str) -> Value {
        self.inner.defaults.default_for(key).unwrap_or(Value::Null)
    }

    // ========================================================================
    // MERGE OPERATOR
    // ========================================================================

    /// Shallow-merge `partial` into the current value of `key` with no
    /// expiry, writing the result through the normal write path.
    pub async fn assign(&self, key: &str, partial: Value) -> CacheResult<Value> {
        self.assign_ex(key, Duration::ZERO, partial).await
    }

    /// Shallow-merge `partial` into the current value of `key`.
    ///
    /// The current value is resolved through the read path, falling back
    /// to the key's default. Keys of `partial` override the base; other
    /// base keys are preserved. Returns the merged value immediately; the
    /// write itself is still debounced.
    ///
    /// # Errors
    ///
    /// [`CacheError::TypeMismatch`] if `partial` is not an object, or if
    /// the resolved base is not an object (including "absent with no
    /// default").
    pub async fn assign_ex(&self, key: &str, ttl: Duration, partial: Value) -> CacheResult<Value> {
        let Value::Object(patch) = partial else {
            return Err(CacheError::TypeMismatch {
                key: key.to_string(),
                found: json_type_name(&partial),
            });
        };

        let base = match self.get_opt(key).await {
            Some(value) => Some(value),
            None => self.inner.defaults.default_for(key),
        };
        let merged = match base {
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(CacheError::TypeMismatch {
                    key: key.to_string(),
                    found: json_type_name(&other),
                })
            }
            None => {
                return Err(CacheError::TypeMismatch {
                    key: key.to_string(),
                    found: "absent",
                })
            }
        };

        let merged = shallow_merge(merged, patch);
        self.set_ex(key, ttl, merged.clone());
        Ok(merged)
    }

    // ========================================================================
    // DELETE & ENUMERATION
    // ========================================================================

    /// Delete `key` everywhere, returning the previous value (or the
    /// key's default when nothing was stored).
    pub async fn del(&self, key: &str) -> Value {
        let previous = self.get_opt(key).await;
        self.remove_everywhere(key).await;
        match previous {
            Some(value) => value,
            None => self.default_for(key),
        }
    }

    /// Remove `key` from the value cache, the write queue, the known-key
    /// set, and (best effort) the backend.
    async fn remove_everywhere(&self, key: &str) {
        {
            let mut state = self.state();
            state.values.evict(key);
            state.queue.remove(key);
            if state.known_keys.remove(key) {
                state.keys_dirty = true;
            }
        }
        if let Err(err) = self.inner.backend.delete(key).await {
            warn!(key, error = %err, "backend delete failed");
        }
        self.persist_known_keys().await;
    }

    /// Keys `get_all` and `flush_db` operate on: the schema's keys
    /// unioned with every key ever written.
    fn enumeration_keys(&self) -> Vec<String> {
        let state = self.state();
        let mut keys: Vec<String> = self.inner.defaults.keys().map(str::to_string).collect();
        for key in &state.known_keys {
            if !self.inner.defaults.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Resolve every known key through the read path.
    ///
    /// Keys with no defined default that were never written are omitted.
    pub async fn get_all(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for key in self.enumeration_keys() {
            if let Some(value) = self.get_opt(&key).await {
                out.insert(key, value);
            } else if let Some(default) = self.inner.defaults.default_for(&key) {
                out.insert(key, default);
            }
        }
        out
    }

    /// Delete every known key: a full reset back to defaults.
    ///
    /// Not to be confused with draining the write queue; see
    /// [`flush_pending`](Self::flush_pending) for that.
    pub async fn flush_db(&self) {
        for key in self.enumeration_keys() {
            let _ = self.del(&key).await;
        }
    }

    // ========================================================================
    // EXPIRATION SWEEP
    // ========================================================================

    /// Scan the backend and remove every expired record from backend,
    /// value cache, and known-key set.
    ///
    /// Unless `force` is set, the scan is skipped when one ran within
    /// [`SWEEP_COOLDOWN`]. This is the only path that guarantees
    /// backend-side cleanup of expired records that are never re-read.
    pub async fn clear_expired(&self, force: bool) {
        let now = now_millis();
        {
            let mut state = self.state();
            let cooldown = SWEEP_COOLDOWN.as_millis() as DurationMs;
            if !force && state.last_sweep_ms != 0 && now - state.last_sweep_ms < cooldown {
                return;
            }
            state.last_sweep_ms = now;
        }

        let records = match self.inner.backend.list_all().await {
            Ok(records) => records,
            Err(err) => {
                warn!(db = %self.inner.db_name, error = %err, "sweep enumeration failed");
                return;
            }
        };

        let mut removed = 0usize;
        for record in records {
            if is_reserved_key(&record.key) || !record.is_expired(now) {
                continue;
            }
            if let Err(err) = self.inner.backend.delete(&record.key).await {
                warn!(key = %record.key, error = %err, "sweep delete failed");
                continue;
            }
            let mut state = self.state();
            state.values.evict(&record.key);
            if state.known_keys.remove(&record.key) {
                state.keys_dirty = true;
            }
            removed += 1;
        }
        if removed > 0 {
            debug!(db = %self.inner.db_name, removed, "expired records swept");
        }
        self.persist_known_keys().await;
    }

    fn spawn_sweep(&self) {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.clear_expired(false).await;
        });
    }

    /// Persist the known-key side index if it changed.
    async fn persist_known_keys(&self) {
        let record = {
            let mut state = self.state();
            if !state.keys_dirty {
                return;
            }
            state.keys_dirty = false;
            known_keys_record(&state.known_keys)
        };
        if let Err(err) = self.inner.backend.put_batch(vec![record]).await {
            warn!(db = %self.inner.db_name, error = %err, "failed to persist known-key index");
        }
    }
}

/// Shallow merge: fields of `patch` override `base`; other base fields
/// are preserved. Nested objects are replaced wholesale, not recursed
/// into.
fn shallow_merge(mut base: Map<String, Value>, patch: Map<String, Value>) -> Value {
    for (field, value) in patch {
        base.insert(field, value);
    }
    Value::Object(base)
}

/// Build the reserved record persisting the known-key set.
fn known_keys_record(keys: &BTreeSet<String>) -> StoredRecord {
    let items = keys.iter().cloned().map(Value::String).collect();
    StoredRecord::new(KNOWN_KEYS_KEY, Value::Array(items), NEVER_EXPIRES)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, db_name: &str) -> CacheConfig {
        CacheConfig::new(db_name)
            .with_data_dir(dir.path())
            .with_backend(BackendChoice::FlatFile)
            .with_optimistic_delay(Duration::from_millis(20))
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new("sessions")
            .with_data_dir("/tmp/elsewhere")
            .with_defaults(json!({ "a": 1 }))
            .with_optimistic_delay(Duration::from_millis(50))
            .with_ignore_cache(true)
            .with_backend(BackendChoice::FlatFile);

        assert_eq!(config.db_name, "sessions");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.default_value.len(), 1);
        assert_eq!(config.optimistic_delay, Duration::from_millis(50));
        assert!(config.ignore_cache);
        assert_eq!(config.backend, BackendChoice::FlatFile);
    }

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::new("db");
        assert_eq!(
            config.optimistic_delay,
            Duration::from_millis(DEFAULT_OPTIMISTIC_DELAY_MS)
        );
        assert!(!config.ignore_cache);
        assert_eq!(config.backend, BackendChoice::Auto);
        assert!(config.set_format.is_none());
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("OPTIKV_DATA_DIR", "/tmp/optikv-env");
        std::env::set_var("OPTIKV_OPTIMISTIC_DELAY_MS", "125");
        let config = CacheConfig::from_env("envdb");
        std::env::remove_var("OPTIKV_DATA_DIR");
        std::env::remove_var("OPTIKV_OPTIMISTIC_DELAY_MS");

        assert_eq!(config.db_name, "envdb");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/optikv-env"));
        assert_eq!(config.optimistic_delay, Duration::from_millis(125));
    }

    #[tokio::test]
    async fn test_stale_timer_generation_does_not_flush() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = WriteBackCache::open(test_config(&dir, "stale_gen"))
            .await
            .expect("open should succeed");

        // Drive the queue directly so no real timers are armed.
        let stale = cache
            .state()
            .queue
            .enqueue("k", Duration::ZERO, json!(1));
        cache.state().queue.bump_generation();

        // A timer holding a superseded generation must not drain anything.
        cache.flush_gated(Some(stale)).await;
        assert_eq!(cache.pending_writes(), 1);

        cache.flush_gated(None).await;
        assert_eq!(cache.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_assign_rejects_non_object_partial() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = WriteBackCache::open(test_config(&dir, "assign_scalar"))
            .await
            .expect("open should succeed");

        let err = cache
            .assign("k", json!(42))
            .await
            .expect_err("scalar partial must be rejected");
        assert!(matches!(
            err,
            CacheError::TypeMismatch { ref found, .. } if *found == "number"
        ));
    }

    #[tokio::test]
    async fn test_assign_rejects_scalar_base() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = WriteBackCache::open(test_config(&dir, "assign_base"))
            .await
            .expect("open should succeed");

        cache.set("k", json!("just a string"));
        let err = cache
            .assign("k", json!({ "a": 1 }))
            .await
            .expect_err("scalar base must be rejected");
        assert!(matches!(
            err,
            CacheError::TypeMismatch { ref found, .. } if *found == "string"
        ));
    }

    #[tokio::test]
    async fn test_assign_rejects_absent_base_without_default() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = WriteBackCache::open(test_config(&dir, "assign_absent"))
            .await
            .expect("open should succeed");

        let err = cache
            .assign("never-written", json!({ "a": 1 }))
            .await
            .expect_err("absent base with no default must be rejected");
        assert!(matches!(
            err,
            CacheError::TypeMismatch { ref found, .. } if *found == "absent"
        ));
    }

    #[tokio::test]
    async fn test_ignore_cache_skips_repopulation() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = test_config(&dir, "nocache").with_ignore_cache(true);
        let cache = WriteBackCache::open(config)
            .await
            .expect("open should succeed");

        cache.set("k", json!(1));
        cache.flush_pending().await;
        // Drop the write-time cache entry, then read through the backend.
        cache.state().values.clear();

        assert_eq!(cache.get("k").await, json!(1));
        assert_eq!(cache.resident_entries(), 0);
    }

    #[tokio::test]
    async fn test_format_hooks_round_trip() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = test_config(&dir, "format")
            .with_set_format(|value| json!({ "wrapped": value }))
            .with_get_format(|value| value["wrapped"].clone());
        let cache = WriteBackCache::open(config)
            .await
            .expect("open should succeed");

        cache.set("k", json!([1, 2, 3]));
        cache.flush_pending().await;
        cache.state().values.clear();

        // The stored shape is transformed; the read-back value is not.
        assert_eq!(cache.get("k").await, json!([1, 2, 3]));
        let raw = cache
            .inner
            .backend
            .get("k")
            .await
            .expect("backend get should succeed")
            .expect("record should exist");
        assert_eq!(raw.value, json!({ "wrapped": [1, 2, 3] }));
    }

    mod merge_laws {
        use super::*;
        use proptest::prelude::*;

        fn json_map() -> impl Strategy<Value = Map<String, Value>> {
            proptest::collection::btree_map("[a-d]{1,2}", -100i64..100, 0..6).prop_map(|m| {
                m.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Map<String, Value>>()
            })
        }

        proptest! {
            #[test]
            fn patch_fields_win_and_base_fields_survive(
                base in json_map(),
                patch in json_map(),
            ) {
                let merged = shallow_merge(base.clone(), patch.clone());
                let merged = merged.as_object().expect("merge yields an object");

                for (field, value) in &patch {
                    prop_assert_eq!(merged.get(field), Some(value));
                }
                for (field, value) in &base {
                    if !patch.contains_key(field) {
                        prop_assert_eq!(merged.get(field), Some(value));
                    }
                }
                let expected: std::collections::BTreeSet<&String> =
                    base.keys().chain(patch.keys()).collect();
                prop_assert_eq!(merged.len(), expected.len());
            }

            #[test]
            fn empty_patch_is_identity(base in json_map()) {
                let merged = shallow_merge(base.clone(), Map::new());
                prop_assert_eq!(merged, Value::Object(base));
            }
        }
    }

    #[test]
    fn test_json_type_names() {
        assert_eq!(json_type_name(&json!(null)), "null");
        assert_eq!(json_type_name(&json!(true)), "boolean");
        assert_eq!(json_type_name(&json!(1.5)), "number");
        assert_eq!(json_type_name(&json!("s")), "string");
        assert_eq!(json_type_name(&json!([])), "array");
        assert_eq!(json_type_name(&json!({})), "object");
    }
}
