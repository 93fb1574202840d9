//! CLI configuration handling.

use anyhow::{Context, Result};
use credbroker_core::{ClientConfig, CredentialStore, FileStore};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load configuration from `path`, or from the default location.
///
/// An explicitly given file must exist. A missing default file yields the
/// default configuration, which has no platform sections configured.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => read_config(path),
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                read_config(&default_path)
            } else {
                tracing::debug!("No config at {:?}, using defaults", default_path);
                Ok(ClientConfig::default())
            }
        }
    }
}

fn read_config(path: &Path) -> Result<ClientConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {:?}", path))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse config from {:?}", path))
}

/// `credbroker.toml` in the platform config directory.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("credbroker.toml"))
        .unwrap_or_else(|| PathBuf::from("credbroker.toml"))
}

/// Open the token cache named by the configuration, or the default one.
pub fn open_store(config: &ClientConfig) -> Result<Arc<dyn CredentialStore>> {
    let store = match &config.cache_path {
        Some(path) => FileStore::open(path)
            .with_context(|| format!("Failed to open token cache {:?}", path))?,
        None => FileStore::open_default().context("Failed to open default token cache")?,
    };
    tracing::debug!("Using token cache {:?}", store.path());
    Ok(Arc::new(store))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "credbroker", "credbroker")
}
