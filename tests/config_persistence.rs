#![allow(clippy::field_reassign_with_default)]
//! Config load/save round-trips against isolated temp directories.
//!
//! Covers first-run initialization, on-disk edits surviving a reload,
//! environment overrides, validation of hand-edited files and the JSON Schema
//! export used by `clawguard config schema`.

use std::fs;

use clawguard::config::{Config, StorageBackendKind};

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_load_writes_default_config_file() {
    let tmp = tempfile::TempDir::new().expect("tempdir creation should succeed");
    let dir = tmp.path().join("nested").join("clawguard");

    let config = Config::load_or_init_in(&dir).await.unwrap();

    let path = dir.join("config.toml");
    assert!(path.exists(), "config.toml should be created on first load");
    assert_eq!(config.config_path, path);
    assert_eq!(config.storage.max_write_attempts, 16);

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("[storage]"));
    assert!(written.contains("[bus]"));
}

#[cfg(unix)]
#[tokio::test]
async fn saved_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::TempDir::new().expect("tempdir creation should succeed");
    let config = Config::load_or_init_in(tmp.path()).await.unwrap();
    let mode = fs::metadata(&config.config_path)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trips
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn saved_changes_survive_reload() {
    let tmp = tempfile::TempDir::new().expect("tempdir creation should succeed");
    let mut config = Config::load_or_init_in(tmp.path()).await.unwrap();
    config.storage.max_write_attempts = 4;
    config.bus.event_capacity = 8;
    config.save().await.unwrap();

    let reloaded = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(reloaded.storage.max_write_attempts, 4);
    assert_eq!(reloaded.bus.event_capacity, 8);
}

#[tokio::test]
async fn hand_edited_partial_file_keeps_defaults_for_missing_keys() {
    let tmp = tempfile::TempDir::new().expect("tempdir creation should succeed");
    fs::write(
        tmp.path().join("config.toml"),
        "[storage]\nbackend = \"file\"\npath = \"records\"\n",
    )
    .unwrap();

    let config = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(config.bus.event_capacity, 64);
    assert_eq!(config.storage_path("ledger"), tmp.path().join("records"));
}

#[tokio::test]
async fn invalid_values_are_rejected_on_load() {
    let tmp = tempfile::TempDir::new().expect("tempdir creation should succeed");
    fs::write(
        tmp.path().join("config.toml"),
        "[storage]\nmax_write_attempts = 0\n",
    )
    .unwrap();

    let err = Config::load_or_init_in(tmp.path()).await.unwrap_err();
    assert!(err.to_string().contains("max_write_attempts"));
}

#[tokio::test]
async fn malformed_toml_is_a_load_error() {
    let tmp = tempfile::TempDir::new().expect("tempdir creation should succeed");
    fs::write(tmp.path().join("config.toml"), "[storage\nbackend = ").unwrap();

    let err = Config::load_or_init_in(tmp.path()).await.unwrap_err();
    assert!(err.to_string().contains("parse"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment overrides
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn env_overrides_replace_file_values() {
    let mut config = Config::default();
    std::env::set_var("CLAWGUARD_LOG", "clawguard=trace");
    config.apply_env_overrides();
    std::env::remove_var("CLAWGUARD_LOG");

    assert_eq!(config.log.level, "clawguard=trace");
    assert_eq!(config.storage.backend, StorageBackendKind::Sqlite);
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema export
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn json_schema_describes_every_section() {
    let schema = schemars::schema_for!(Config);
    let json = serde_json::to_value(&schema).unwrap();
    let properties = json["properties"].as_object().unwrap();
    for section in ["storage", "bus", "log"] {
        assert!(properties.contains_key(section), "missing {section}");
    }
    assert!(!properties.contains_key("config_path"));
}
