use super::traits::{LedgerBackend, StoredRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One pretty-printed JSON document per record key under a directory.
///
/// Writes go through a temp file and an atomic rename, so a crash leaves
/// either the old or the new document, never a torn one. Version checks are
/// serialized inside this process only; processes sharing the directory
/// should use the SQLite backend instead.
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    async fn read_record(&self, key: &str) -> Result<Option<StoredRecord>> {
        let path = self.record_path(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to read ledger file {}", path.display()))
            }
        };
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("Ledger file {} is not a valid record", path.display()))?;
        Ok(Some(record))
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl LedgerBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        self.read_record(key).await
    }

    async fn compare_and_store(
        &self,
        key: &str,
        expected_version: u64,
        record: &StoredRecord,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .read_record(key)
            .await?
            .map_or(0, |existing| existing.version);
        if current != expected_version {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir).await.with_context(|| {
            format!("Failed to create ledger directory {}", self.dir.display())
        })?;

        let body = serde_json::to_string_pretty(record).context("Failed to serialize record")?;
        let path = self.record_path(key);
        let temp_path = self
            .dir
            .join(format!(".{}.tmp-{}", sanitize_key(key), uuid::Uuid::new_v4()));

        let mut temp_file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!("Failed to create temporary ledger file {}", temp_path.display())
            })?;
        temp_file
            .write_all(body.as_bytes())
            .await
            .context("Failed to write temporary ledger file")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary ledger file")?;
        drop(temp_file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(error) =
                fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await
            {
                tracing::warn!(
                    path = %temp_path.display(),
                    error = %error,
                    "Failed to restrict ledger record permissions to owner-only"
                );
            }
        }

        if let Err(error) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error).with_context(|| {
                format!("Failed to atomically replace ledger file {}", path.display())
            });
        }

        Ok(true)
    }

    async fn health_check(&self) -> bool {
        fs::create_dir_all(&self.dir).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(version: u64) -> StoredRecord {
        StoredRecord {
            value: serde_json::json!({ "enabled": version % 2 == 0 }),
            version,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sanitize_key_replaces_path_characters() {
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_key("general-settings"), "general-settings");
    }

    #[tokio::test]
    async fn write_then_reload_from_fresh_backend() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path().join("ledger"));
        assert!(backend.compare_and_store("firewall", 0, &record(1)).await.unwrap());
        assert!(backend.compare_and_store("firewall", 1, &record(2)).await.unwrap());

        let reopened = FileBackend::new(tmp.path().join("ledger"));
        let loaded = reopened.load("firewall").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.value, serde_json::json!({ "enabled": true }));
    }

    #[tokio::test]
    async fn stale_write_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path());
        assert!(backend.compare_and_store("k", 0, &record(1)).await.unwrap());
        assert!(!backend.compare_and_store("k", 0, &record(1)).await.unwrap());
        assert_eq!(backend.load("k").await.unwrap().unwrap().version, 1);

        let leftovers = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn garbage_file_is_reported_not_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("k.json"), "{not-json").unwrap();
        let backend = FileBackend::new(tmp.path());
        let err = backend.load("k").await.unwrap_err();
        assert!(err.to_string().contains("not a valid record"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn record_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path());
        assert!(backend.compare_and_store("analytics", 0, &record(1)).await.unwrap());
        let mode = std::fs::metadata(backend.record_path("analytics"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
