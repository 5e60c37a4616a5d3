use super::traits::{LedgerBackend, StoredRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed ledger medium. One row per record key.
///
/// Several processes may open the same database file; the conditional upsert
/// in [`LedgerBackend::compare_and_store`] keeps their writes from overwriting
/// each other.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open ledger DB: {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set ledger busy timeout")?;
        // journal_mode returns a row, so it cannot go through execute_batch.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to enable WAL journal")?;
        init_schema(&conn)?;

        tracing::info!(path = %db_path.display(), "Ledger database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(db_path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory ledger DB")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .context("Ledger database task panicked")?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ledger_records (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            version    INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
    .context("Failed to initialize ledger schema")
}

fn version_to_sql(version: u64) -> Result<i64> {
    i64::try_from(version).context("Ledger version overflows i64")
}

#[async_trait]
impl LedgerBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT value, version, updated_at FROM ledger_records WHERE key = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("Failed to read ledger record '{key}'"))?;

            let Some((value, version, updated_at)) = row else {
                return Ok(None);
            };

            let value = serde_json::from_str(&value)
                .with_context(|| format!("Ledger record '{key}' holds invalid JSON"))?;
            let version = u64::try_from(version)
                .with_context(|| format!("Ledger record '{key}' has a negative version"))?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map(|ts| ts.with_timezone(&Utc))
                .with_context(|| format!("Ledger record '{key}' has an invalid timestamp"))?;

            Ok(Some(StoredRecord {
                value,
                version,
                updated_at,
            }))
        })
        .await
    }

    async fn compare_and_store(
        &self,
        key: &str,
        expected_version: u64,
        record: &StoredRecord,
    ) -> Result<bool> {
        let key = key.to_string();
        let value = serde_json::to_string(&record.value).context("Failed to encode record")?;
        let version = version_to_sql(record.version)?;
        let expected = version_to_sql(expected_version)?;
        let updated_at = record.updated_at.to_rfc3339();

        self.with_connection(move |conn| {
            let changed = if expected == 0 {
                conn.execute(
                    "INSERT INTO ledger_records (key, value, version, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO NOTHING",
                    params![key, value, version, updated_at],
                )
            } else {
                conn.execute(
                    "UPDATE ledger_records
                     SET value = ?2, version = ?3, updated_at = ?4
                     WHERE key = ?1 AND version = ?5",
                    params![key, value, version, updated_at, expected],
                )
            }
            .with_context(|| format!("Failed to write ledger record '{key}'"))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .context("Ledger health probe failed")
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(version: u64, n: i64) -> StoredRecord {
        StoredRecord {
            value: serde_json::json!({ "n": n }),
            version,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_key_loads_as_none() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.load("general").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_then_conditional_update() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.compare_and_store("k", 0, &record(1, 1)).await.unwrap());
        // A second "first write" must not clobber the existing row.
        assert!(!backend.compare_and_store("k", 0, &record(1, 9)).await.unwrap());
        assert!(!backend.compare_and_store("k", 5, &record(6, 9)).await.unwrap());
        assert!(backend.compare_and_store("k", 1, &record(2, 2)).await.unwrap());

        let loaded = backend.load("k").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.value, serde_json::json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("ledger.db");
        {
            let backend = SqliteBackend::open(&db_path).unwrap();
            assert!(backend.compare_and_store("k", 0, &record(1, 7)).await.unwrap());
        }

        let reopened = SqliteBackend::open(&db_path).unwrap();
        let loaded = reopened.load("k").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.value, serde_json::json!({ "n": 7 }));
        assert!(reopened.health_check().await);
    }

    #[tokio::test]
    async fn two_handles_on_one_file_do_not_overwrite_each_other() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("ledger.db");
        let first = SqliteBackend::open(&db_path).unwrap();
        let second = SqliteBackend::open(&db_path).unwrap();

        assert!(first.compare_and_store("k", 0, &record(1, 1)).await.unwrap());
        assert!(!second.compare_and_store("k", 0, &record(1, 2)).await.unwrap());
        assert_eq!(second.load("k").await.unwrap().unwrap().value["n"], 1);
    }
}
