//! LMDB-backed structured store.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the preferred
//! persistence engine. One environment is created per logical database
//! under the configured data directory.
//!
//! # Record Encoding
//!
//! Values are stored as `[expires_at: 8 bytes LE][json bytes]`, so expiry
//! can be inspected without deserializing the payload. `expires_at == 0`
//! means the record never expires.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions: read transactions for `get`/`list_all`
//! and one write transaction per `put_batch`/`delete`.

use std::path::Path;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use optikv_core::{BackendError, BackendResult, DurationMs, StoredRecord};
use serde_json::Value;
use tracing::warn;

use crate::backend::StoreBackend;

/// Default LMDB map size in megabytes.
const DEFAULT_MAP_SIZE_MB: usize = 256;

/// LMDB-backed implementation of [`StoreBackend`].
pub struct LmdbBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Bytes>,
}

impl LmdbBackend {
    /// Open (or create) the environment for `db_name` under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] if the environment directory
    /// cannot be created or the LMDB environment cannot be opened; this is
    /// the signal `open_backend` uses to degrade to the flat store.
    pub fn open<P: AsRef<Path>>(data_dir: P, db_name: &str) -> BackendResult<Self> {
        Self::open_with_map_size(data_dir, db_name, DEFAULT_MAP_SIZE_MB)
    }

    /// Open with an explicit map size in megabytes.
    pub fn open_with_map_size<P: AsRef<Path>>(
        data_dir: P,
        db_name: &str,
        map_size_mb: usize,
    ) -> BackendResult<Self> {
        let env_path = data_dir.as_ref().join(format!("{db_name}.lmdb"));
        std::fs::create_dir_all(&env_path).map_err(|e| BackendError::Unavailable {
            reason: format!("cannot create {}: {e}", env_path.display()),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&env_path)
        }
        .map_err(|e| BackendError::Unavailable {
            reason: format!("cannot open LMDB environment: {e}"),
        })?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| BackendError::Unavailable { reason: e.to_string() })?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| BackendError::Unavailable { reason: e.to_string() })?;
        wtxn.commit()
            .map_err(|e| BackendError::Unavailable { reason: e.to_string() })?;

        Ok(Self { env, db })
    }

    /// Encode a record value as `[expires_at][json]`.
    fn encode(value: &Value, expires_at: DurationMs) -> BackendResult<Vec<u8>> {
        let json = serde_json::to_vec(value).map_err(|e| BackendError::CorruptRecord {
            key: String::new(),
            reason: e.to_string(),
        })?;
        let mut bytes = Vec::with_capacity(8 + json.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    /// Decode a stored payload back into `(value, expires_at)`.
    fn decode(key: &str, bytes: &[u8]) -> BackendResult<(Value, DurationMs)> {
        if bytes.len() < 8 {
            return Err(BackendError::CorruptRecord {
                key: key.to_string(),
                reason: format!("payload too short: {} bytes", bytes.len()),
            });
        }
        let mut expiry_bytes = [0u8; 8];
        expiry_bytes.copy_from_slice(&bytes[0..8]);
        let expires_at = DurationMs::from_le_bytes(expiry_bytes);
        let value: Value =
            serde_json::from_slice(&bytes[8..]).map_err(|e| BackendError::CorruptRecord {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok((value, expires_at))
    }

    /// Remove a corrupt record's bytes so the next read is a clean miss.
    fn remove_corrupt(&self, key: &str) {
        let Ok(mut wtxn) = self.env.write_txn() else {
            return;
        };
        let _ = self.db.delete(&mut wtxn, key);
        let _ = wtxn.commit();
    }
}

#[async_trait]
impl StoreBackend for LmdbBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<StoredRecord>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| BackendError::op("get", key, e))?;

        let Some(bytes) = self
            .db
            .get(&rtxn, key)
            .map_err(|e| BackendError::op("get", key, e))?
        else {
            return Ok(None);
        };

        match Self::decode(key, bytes) {
            Ok((value, expires_at)) => Ok(Some(StoredRecord::new(key, value, expires_at))),
            Err(err) => {
                warn!(key, error = %err, "dropping corrupt record");
                drop(rtxn);
                self.remove_corrupt(key);
                Ok(None)
            }
        }
    }

    async fn put_batch(&self, records: Vec<StoredRecord>) -> BackendResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| BackendError::op("put_batch", "", e))?;

        for record in &records {
            let bytes = Self::encode(&record.value, record.expires_at)?;
            self.db
                .put(&mut wtxn, &record.key, &bytes)
                .map_err(|e| BackendError::op("put_batch", record.key.clone(), e))?;
        }

        wtxn.commit()
            .map_err(|e| BackendError::op("put_batch", "", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| BackendError::op("delete", key, e))?;
        self.db
            .delete(&mut wtxn, key)
            .map_err(|e| BackendError::op("delete", key, e))?;
        wtxn.commit()
            .map_err(|e| BackendError::op("delete", key, e))?;
        Ok(())
    }

    async fn list_all(&self) -> BackendResult<Vec<StoredRecord>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| BackendError::op("list_all", "", e))?;

        let mut records = Vec::new();
        let mut corrupt = Vec::new();
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| BackendError::op("list_all", "", e))?;

        for item in iter {
            let (key, bytes) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable record during scan");
                    continue;
                }
            };
            match Self::decode(key, bytes) {
                Ok((value, expires_at)) => {
                    records.push(StoredRecord::new(key, value, expires_at));
                }
                Err(err) => {
                    warn!(key, error = %err, "dropping corrupt record during scan");
                    corrupt.push(key.to_string());
                }
            }
        }
        drop(rtxn);

        for key in corrupt {
            self.remove_corrupt(&key);
        }

        Ok(records)
    }
}
