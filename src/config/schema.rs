use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const CONFIG_DIR_ENV: &str = "CLAWGUARD_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level `clawguard` configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Ledger persistence configuration (`[storage]`).
    #[serde(default)]
    pub storage: StorageConfig,

    /// Change notification configuration (`[bus]`).
    #[serde(default)]
    pub bus: BusConfig,

    /// Logging configuration (`[log]`).
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(CONFIG_FILE_NAME),
            storage: StorageConfig::default(),
            bus: BusConfig::default(),
            log: LogConfig::default(),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────

/// Persistence medium behind the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// SQLite database file (safe for several processes)
    #[default]
    Sqlite,
    /// One JSON document per record in a directory
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl StorageBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

impl std::str::FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "file" | "json" => Ok(Self::File),
            "memory" | "none" => Ok(Self::Memory),
            other => anyhow::bail!(
                "Unknown storage backend '{other}'. Known backends: sqlite, file, memory"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// Ledger backend: "sqlite", "file" or "memory"
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Database file (sqlite) or directory (file). Relative paths resolve
    /// against the config directory; `~` is expanded.
    #[serde(default)]
    pub path: Option<String>,
    /// How many times a write re-runs after losing a version race
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

fn default_max_write_attempts() -> u32 {
    crate::ledger::DEFAULT_MAX_WRITE_ATTEMPTS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            path: None,
            max_write_attempts: default_max_write_attempts(),
        }
    }
}

// ── Bus ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BusConfig {
    /// Buffered change events per async receiver before lagging ones skip ahead
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    64
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogConfig {
    /// Filter directive used when RUST_LOG is unset (e.g. "info", "clawguard=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading / saving ────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".clawguard"))
}

fn resolve_config_dir() -> Result<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            Ok(PathBuf::from(shellexpand::tilde(dir.trim()).into_owned()))
        }
        _ => default_config_dir(),
    }
}

/// Resolve `raw` against `base`, expanding a leading `~`.
pub fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = resolve_config_dir()?;
        Self::load_or_init_in(&config_dir).await
    }

    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;
            config
        } else {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o002 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-writable (mode {:o}); anyone can \
                             redirect the ledger. Consider: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            backend = config.storage.backend.as_str(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Directory holding config.toml; relative storage paths resolve here.
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Resolved storage location, falling back to `default_name` in the config dir.
    pub fn storage_path(&self, default_name: &str) -> PathBuf {
        let raw = self.storage.path.as_deref().unwrap_or(default_name);
        resolve_path(&self.config_dir(), raw)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("CLAWGUARD_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.storage.backend = kind,
                Err(error) => tracing::warn!("Ignoring CLAWGUARD_STORAGE_BACKEND: {error}"),
            }
        }

        if let Ok(path) = std::env::var("CLAWGUARD_STORAGE_PATH") {
            if !path.trim().is_empty() {
                self.storage.path = Some(path.trim().to_string());
            }
        }

        if let Ok(level) = std::env::var("CLAWGUARD_LOG") {
            if !level.trim().is_empty() {
                self.log.level = level.trim().to_string();
            }
        }
    }

    /// Validate values that would otherwise fail at arbitrary runtime points.
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_write_attempts == 0 {
            anyhow::bail!("storage.max_write_attempts must be greater than 0");
        }
        if self
            .storage
            .path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            anyhow::bail!("storage.path must not be empty when set");
        }
        if self.bus.event_capacity == 0 {
            anyhow::bail!("bus.event_capacity must be greater than 0");
        }
        if self.log.level.trim().is_empty() {
            anyhow::bail!("log.level must not be empty");
        }
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", parent_dir.display())
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config file")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        #[cfg(unix)]
        {
            use std::{fs::Permissions, os::unix::fs::PermissionsExt};
            if let Err(error) =
                fs::set_permissions(&temp_path, Permissions::from_mode(0o600)).await
            {
                tracing::warn!(
                    path = %temp_path.display(),
                    error = %error,
                    "Failed to restrict config file permissions to owner-only"
                );
            }
        }

        if let Err(error) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error).with_context(|| {
                format!(
                    "Failed to atomically replace config file: {}",
                    self.config_path.display()
                )
            });
        }

        Ok(())
    }
}
