pub mod doctor;
pub mod ingest;
pub mod init;
pub mod prune;
pub mod run;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use murmur_config::{AppConfig, ConfigError, MemoryConfig};
use murmur_core::error::StoreError;
use murmur_core::store::ContextStore;
use murmur_memory::{InMemoryStore, SqliteStore};

/// Resolve the config file path the commands operate on.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the config file and environment overrides without validating.
///
/// Maintenance commands (`status`, `ingest`, `prune`) only need the store
/// and backend sections, so missing Discord credentials must not stop them.
pub fn load_unvalidated(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load_from(&config_path(explicit))?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// Open the configured context store.
pub async fn open_store(config: &MemoryConfig) -> Result<Arc<dyn ContextStore>, StoreError> {
    match config.backend.as_str() {
        "in_memory" => Ok(Arc::new(InMemoryStore::new())),
        _ => Ok(Arc::new(SqliteStore::open_file(&config.db_path()).await?)),
    }
}
