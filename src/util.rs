use std::path::PathBuf;

use crate::config::StorageConfig;

const NETMON_CONFIG: &str = "NETMON_CONFIG";

const DEFAULT_CONFIG: &str = "./config.json";

/// Config file location, `NETMON_CONFIG` or `./config.json`
pub fn get_config_path() -> String {
    std::env::var(NETMON_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}

const NETMON_DB_PATH: &str = "NETMON_DB_PATH";

pub fn get_db_path() -> Option<PathBuf> {
    std::env::var(NETMON_DB_PATH)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
}

/// Point the SQLite backend at `db_path` when set, creating one if no
/// storage was configured. An explicit in-memory backend stays in memory.
pub fn apply_db_path(storage: Option<StorageConfig>, db_path: Option<PathBuf>) -> StorageConfig {
    match (storage, db_path) {
        (Some(StorageConfig::Sqlite { retention_days, .. }), Some(path)) => {
            StorageConfig::Sqlite {
                path,
                retention_days,
            }
        }
        (None, Some(path)) => StorageConfig::Sqlite {
            path,
            retention_days: None,
        },
        (storage, _) => storage.unwrap_or_default(),
    }
}
