//! Flat string-keyed fallback store.
//!
//! Used when the structured engine cannot be opened. The whole logical
//! database lives in one JSON document (`<data_dir>/<db_name>.json`) that
//! is loaded at open and rewritten atomically (write-then-rename) after
//! every mutation. Simple and slow, which is fine: it only exists so the
//! cache keeps working in degraded environments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use optikv_core::{BackendError, BackendResult, DurationMs, StoredRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::backend::StoreBackend;

/// On-disk shape of one flat-store slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlatSlot {
    value: Value,
    expires_at: DurationMs,
}

/// Flat file implementation of [`StoreBackend`].
pub struct FlatFileBackend {
    path: PathBuf,
    slots: RwLock<BTreeMap<String, FlatSlot>>,
}

impl FlatFileBackend {
    /// Open (or create) the flat store for `db_name` under `data_dir`.
    ///
    /// A corrupt store file is logged and discarded: the store starts
    /// empty and the bad bytes are overwritten by the next persist.
    pub async fn open<P: AsRef<Path>>(data_dir: P, db_name: &str) -> BackendResult<Self> {
        tokio::fs::create_dir_all(data_dir.as_ref())
            .await
            .map_err(|e| BackendError::Unavailable {
                reason: format!("cannot create {}: {e}", data_dir.as_ref().display()),
            })?;
        let path = data_dir.as_ref().join(format!("{db_name}.json"));

        let slots = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, FlatSlot>>(&bytes) {
                Ok(slots) => slots,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "discarding corrupt flat store file"
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(BackendError::Io(err)),
        };

        Ok(Self {
            path,
            slots: RwLock::new(slots),
        })
    }

    /// Serialize the current slots while holding the lock.
    ///
    /// Kept separate from the write so no guard is held across an await.
    fn snapshot(&self) -> BackendResult<Vec<u8>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| BackendError::op("persist", "", "slot lock poisoned"))?;
        serde_json::to_vec_pretty(&*slots)
            .map_err(|e| BackendError::op("persist", "", e))
    }

    /// Rewrite the store file atomically.
    async fn persist(&self) -> BackendResult<()> {
        let bytes = self.snapshot()?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for FlatFileBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<StoredRecord>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| BackendError::op("get", key, "slot lock poisoned"))?;
        Ok(slots
            .get(key)
            .map(|slot| StoredRecord::new(key, slot.value.clone(), slot.expires_at)))
    }

    async fn put_batch(&self, records: Vec<StoredRecord>) -> BackendResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut slots = self
                .slots
                .write()
                .map_err(|_| BackendError::op("put_batch", "", "slot lock poisoned"))?;
            for record in records {
                slots.insert(
                    record.key,
                    FlatSlot {
                        value: record.value,
                        expires_at: record.expires_at,
                    },
                );
            }
        }
        self.persist().await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let removed = {
            let mut slots = self
                .slots
                .write()
                .map_err(|_| BackendError::op("delete", key, "slot lock poisoned"))?;
            slots.remove(key).is_some()
        };
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn list_all(&self) -> BackendResult<Vec<StoredRecord>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| BackendError::op("list_all", "", "slot lock poisoned"))?;
        Ok(slots
            .iter()
            .map(|(key, slot)| StoredRecord::new(key.clone(), slot.value.clone(), slot.expires_at))
            .collect())
    }
}
