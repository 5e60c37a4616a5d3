use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Untyped record as held by a persistence medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: serde_json::Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Persistence medium underneath the ledger.
///
/// Implementations only move whole records in and out. Typed decoding,
/// default seeding and mutator retries live in [`super::Ledger`]. A backend
/// must never leave a partially written record behind: either the new record
/// is fully visible afterwards or the old one is.
///
/// Implementations must be `Send + Sync` because one backend can be shared by
/// several ledger instances across tasks.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Short backend name for logs (`"sqlite"`, `"file"`, `"memory"`).
    fn name(&self) -> &str;

    /// Return the record stored under `key`, or `None` if it was never written.
    async fn load(&self, key: &str) -> anyhow::Result<Option<StoredRecord>>;

    /// Store `record` only if the currently stored version equals
    /// `expected_version` (`0` meaning "absent").
    ///
    /// Returns `Ok(false)` when another writer got there first; the caller
    /// re-reads and retries. `Err` means the medium was unreachable and nothing
    /// was written.
    async fn compare_and_store(
        &self,
        key: &str,
        expected_version: u64,
        record: &StoredRecord,
    ) -> anyhow::Result<bool>;

    /// Check whether the medium is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}
