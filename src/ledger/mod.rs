//! Durable, versioned storage for named configuration records.
//!
//! The [`Ledger`] is the single shared mutable resource of the crate. Every
//! typed store reads and writes through it, and it is the only place that
//! guarantees ordering: [`Ledger::put`] is an atomic read-modify-write per key.
//!
//! Two layers provide that guarantee. Inside one ledger instance, a per-key
//! async mutex serializes mutators. Across ledger instances sharing a medium,
//! the backend's [`LedgerBackend::compare_and_store`] rejects a write whose
//! base version went stale, and the losing writer re-reads and re-runs its
//! mutator on the winner's result. No write is ever silently lost.
//!
//! Keys never written read back as the schema default at version `0`. The
//! first write that changes the value creates the record at version `1`.

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{LedgerBackend, StoredRecord};

use crate::config::{Config, StorageBackendKind};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 16;

/// A typed payload that owns one ledger key.
pub trait Record:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Debug + Send + Sync + 'static
{
    /// Ledger key this record type is stored under.
    const KEY: &'static str;
}

/// Current state of one record as seen by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord<R> {
    pub key: &'static str,
    pub value: R,
    /// `0` until the first write.
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<R: Record> ConfigRecord<R> {
    fn seed() -> Self {
        Self {
            key: R::KEY,
            value: R::default(),
            version: 0,
            updated_at: None,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.version > 0
    }
}

/// Result of [`Ledger::put`].
#[derive(Debug, Clone, PartialEq)]
pub struct PutResult<R> {
    pub record: ConfigRecord<R>,
    /// `false` when the mutator left the value unchanged and nothing was written.
    pub changed: bool,
}

pub struct Ledger {
    backend: Arc<dyn LedgerBackend>,
    key_locks: Mutex<HashMap<&'static str, Arc<tokio::sync::Mutex<()>>>>,
    max_write_attempts: u32,
}

impl Ledger {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self::with_max_write_attempts(backend, DEFAULT_MAX_WRITE_ATTEMPTS)
    }

    pub fn with_max_write_attempts(backend: Arc<dyn LedgerBackend>, attempts: u32) -> Self {
        Self {
            backend,
            key_locks: Mutex::new(HashMap::new()),
            max_write_attempts: attempts.max(1),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    /// Current record for `R`, seeded with defaults if never written.
    pub async fn get<R: Record>(&self) -> StoreResult<ConfigRecord<R>> {
        let stored = self
            .backend
            .load(R::KEY)
            .await
            .map_err(|error| StoreError::unavailable(R::KEY, error))?;

        let Some(stored) = stored else {
            return Ok(ConfigRecord::seed());
        };

        let value = serde_json::from_value(stored.value).map_err(|source| {
            StoreError::Corrupted {
                key: R::KEY.to_string(),
                source,
            }
        })?;

        Ok(ConfigRecord {
            key: R::KEY,
            value,
            version: stored.version,
            updated_at: Some(stored.updated_at),
        })
    }

    /// Apply `mutator` to the current value and persist the result atomically.
    ///
    /// The mutator may run more than once if another ledger instance wins a
    /// version race; every run sees the latest committed value. On error the
    /// stored record keeps its pre-call version.
    pub async fn put<R, F>(&self, mut mutator: F) -> StoreResult<PutResult<R>>
    where
        R: Record,
        F: FnMut(R) -> R + Send,
    {
        let key_lock = self.key_lock(R::KEY);
        let _serialized = key_lock.lock().await;

        for attempt in 1..=self.max_write_attempts {
            let current = self.get::<R>().await?;
            let next = mutator(current.value.clone());
            if next == current.value {
                return Ok(PutResult {
                    record: current,
                    changed: false,
                });
            }

            let encoded = serde_json::to_value(&next).map_err(|source| StoreError::Corrupted {
                key: R::KEY.to_string(),
                source,
            })?;
            let stored = StoredRecord {
                value: encoded,
                version: current.version + 1,
                updated_at: Utc::now(),
            };

            let committed = self
                .backend
                .compare_and_store(R::KEY, current.version, &stored)
                .await
                .map_err(|error| StoreError::unavailable(R::KEY, error))?;

            if committed {
                tracing::debug!(
                    key = R::KEY,
                    version = stored.version,
                    backend = self.backend.name(),
                    "Ledger record written"
                );
                return Ok(PutResult {
                    record: ConfigRecord {
                        key: R::KEY,
                        value: next,
                        version: stored.version,
                        updated_at: Some(stored.updated_at),
                    },
                    changed: true,
                });
            }

            tracing::warn!(
                key = R::KEY,
                attempt,
                base_version = current.version,
                "Ledger write lost a version race; retrying on fresh state"
            );
        }

        Err(StoreError::WriteConflict {
            key: R::KEY.to_string(),
            attempts: self.max_write_attempts,
        })
    }

    fn key_lock(&self, key: &'static str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock();
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Build the ledger described by `config.storage`.
pub fn open_ledger(config: &Config) -> anyhow::Result<Ledger> {
    let backend: Arc<dyn LedgerBackend> = match config.storage.backend {
        StorageBackendKind::Sqlite => {
            Arc::new(SqliteBackend::open(&config.storage_path("ledger.db"))?)
        }
        StorageBackendKind::File => Arc::new(FileBackend::new(config.storage_path("ledger"))),
        StorageBackendKind::Memory => {
            tracing::warn!("Memory ledger selected; settings will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };

    Ok(Ledger::with_max_write_attempts(
        backend,
        config.storage.max_write_attempts,
    ))
}
