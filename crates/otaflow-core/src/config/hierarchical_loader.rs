//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. Runtime config (~/.otaflow/otaflow-runtime.yaml)
//! 3. Environment variables (OTAFLOW_* prefix)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::RuntimeConfig;
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const RUNTIME_CONFIG_FILE: &str = "otaflow-runtime.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a new hierarchical config loader rooted at `~/.otaflow`
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::invalid_config("Could not determine home directory"))?;

        let config_dir = Utf8PathBuf::from(home).join(".otaflow");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(config_dir)
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = Self::load_embedded_config::<RuntimeConfig>("runtime-defaults.yaml")?;

        let runtime_config_path = self.config_dir.join(RUNTIME_CONFIG_FILE);
        if runtime_config_path.exists() {
            debug!("Loading runtime overrides from {}", runtime_config_path);
            let file_config = self.load_yaml_file::<RuntimeConfig>(&runtime_config_path)?;
            config = Self::merge_runtime_config(config, file_config);
        }

        config = self.apply_env_overrides(config)?;

        // Relative to the loader's directory unless overridden
        if config.paths.configs_dir.is_none() {
            config.paths.configs_dir = Some(self.config_dir.join("configs").into_std_path_buf());
        }
        if config.paths.state_file.is_none() {
            config.paths.state_file = Some(self.config_dir.join("state.json").into_std_path_buf());
        }

        Ok(config)
    }

    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        let config: T = serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })?;

        Ok(config)
    }

    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let config: T = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))?;
        Ok(config)
    }

    /// Merge two runtime configs (base is overridden by overlay)
    ///
    /// Sections are replaced wholesale; unset fields inside an overlay
    /// section already carry their serde defaults. Optional paths only
    /// replace the base when the overlay sets them.
    fn merge_runtime_config(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
        let mut paths = overlay.paths;
        if paths.configs_dir.is_none() {
            paths.configs_dir = base.paths.configs_dir;
        }
        if paths.state_file.is_none() {
            paths.state_file = base.paths.state_file;
        }

        RuntimeConfig {
            network: overlay.network,
            sources: overlay.sources,
            paths,
            device: overlay.device,
            engine: overlay.engine,
            store: overlay.store,
        }
    }

    fn apply_env_overrides(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Some(val) = env_number("OTAFLOW_CONNECT_TIMEOUT_SECS")? {
            config.network.connect_timeout_secs = val;
        }

        if let Some(val) = env_number("OTAFLOW_READ_TIMEOUT_SECS")? {
            config.network.read_timeout_secs = val;
        }

        if let Some(val) = env_number("OTAFLOW_MAX_CONFIG_SIZE")? {
            config.network.max_config_size = val;
        }

        if let Ok(val) = env::var("OTAFLOW_INCREMENTAL_CONFIG_URL") {
            config.sources.incremental_config_url = val;
        }

        if let Ok(val) = env::var("OTAFLOW_FULL_CONFIG_URL") {
            config.sources.full_config_url = val;
        }

        if let Ok(val) = env::var("OTAFLOW_CONFIGS_DIR") {
            config.paths.configs_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("OTAFLOW_OTA_PACKAGE_DIR") {
            config.paths.ota_package_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("OTAFLOW_STATE_FILE") {
            config.paths.state_file = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("OTAFLOW_ENGINE_CLIENT") {
            config.engine.client_binary = val;
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name))),
        Err(_) => Ok(None),
    }
}
