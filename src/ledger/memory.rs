use super::traits::{LedgerBackend, StoredRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// In-process backend. Nothing survives a restart.
///
/// Doubles as the test medium: availability can be switched off to simulate
/// an unreachable store, and a read latency can be injected so concurrent
/// writers actually interleave between their read and their write.
#[derive(Debug)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, StoredRecord>>,
    available: AtomicBool,
    read_latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            read_latency: None,
        }
    }

    pub fn with_read_latency(latency: Duration) -> Self {
        Self {
            read_latency: Some(latency),
            ..Self::new()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw stored version, bypassing the ledger. `0` when absent.
    pub fn stored_version(&self, key: &str) -> u64 {
        self.records.lock().get(key).map_or(0, |record| record.version)
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("memory ledger is marked unavailable")
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<StoredRecord>> {
        self.ensure_available()?;
        let snapshot = self.records.lock().get(key).cloned();
        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }
        Ok(snapshot)
    }

    async fn compare_and_store(
        &self,
        key: &str,
        expected_version: u64,
        record: &StoredRecord,
    ) -> anyhow::Result<bool> {
        self.ensure_available()?;
        let mut records = self.records.lock();
        let current = records.get(key).map_or(0, |existing| existing.version);
        if current != expected_version {
            return Ok(false);
        }
        records.insert(key.to_string(), record.clone());
        Ok(true)
    }

    async fn health_check(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
