pub mod schema;

pub use schema::{
    resolve_path, BusConfig, Config, LogConfig, StorageBackendKind, StorageConfig, CONFIG_DIR_ENV,
};
