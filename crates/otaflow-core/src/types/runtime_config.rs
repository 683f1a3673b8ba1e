//! Runtime configuration types for operational parameters
//!
//! These types control network timeouts, config sources, on-device paths,
//! property names and update engine behavior.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::otaflow_home;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Where update configs are fetched from
    #[serde(default)]
    pub sources: SourcesConfig,

    /// On-device locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// System property names used to describe the device
    #[serde(default)]
    pub device: DeviceConfig,

    /// Update engine client settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Operation store housekeeping
    #[serde(default)]
    pub store: StoreConfig,
}

/// Network and HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read timeout in seconds, applied between received chunks
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Ceiling for downloaded configuration documents, in bytes
    #[serde(default = "default_max_config_size")]
    pub max_config_size: u64,

    /// Download chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub download_chunk_size: usize,

    /// Minimum interval between progress callbacks
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Minimum interval between progress log lines
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: u64,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_config_size: default_max_config_size(),
            download_chunk_size: default_chunk_size(),
            progress_interval_ms: default_progress_interval(),
            log_interval_secs: default_log_interval(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    30
}
fn default_max_config_size() -> u64 {
    1024 * 1024 // 1 MiB
}
fn default_chunk_size() -> usize {
    4096
}
fn default_progress_interval() -> u64 {
    500
}
fn default_log_interval() -> u64 {
    3
}
fn default_user_agent() -> String {
    format!(
        "otaflow/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Update config sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourcesConfig {
    /// Config describing the incremental (delta) package
    #[serde(default = "default_incremental_url")]
    pub incremental_config_url: String,

    /// Config describing the full package
    #[serde(default = "default_full_url")]
    pub full_config_url: String,

    /// Insert `/<product model>` after the `update` path segment
    #[serde(default = "default_true")]
    pub insert_product_model: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            incremental_config_url: default_incremental_url(),
            full_config_url: default_full_url(),
            insert_product_model: true,
        }
    }
}

fn default_incremental_url() -> String {
    "https://ota.example.com/update/incremental/ota_config.json".to_string()
}
fn default_full_url() -> String {
    "https://ota.example.com/update/full/ota_config.json".to_string()
}
fn default_true() -> bool {
    true
}

/// On-device locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    /// Directory scanned for update config documents (default `~/.otaflow/configs`)
    #[serde(default)]
    pub configs_dir: Option<PathBuf>,

    /// Staging directory for packages and pre-streaming files
    #[serde(default = "default_ota_package_dir")]
    pub ota_package_dir: PathBuf,

    /// Operation store file (default `~/.otaflow/state.json`)
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// File name used when saving a downloaded config
    #[serde(default = "default_config_file_name")]
    pub config_file_name: String,
}

impl PathsConfig {
    /// Resolved configs directory
    pub fn configs_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.configs_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(otaflow_home()?.join("configs")),
        }
    }

    /// Resolved operation store file
    pub fn state_file(&self) -> anyhow::Result<PathBuf> {
        match &self.state_file {
            Some(file) => Ok(file.clone()),
            None => Ok(otaflow_home()?.join("state.json")),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            configs_dir: None,
            ota_package_dir: default_ota_package_dir(),
            state_file: None,
            config_file_name: default_config_file_name(),
        }
    }
}

fn default_ota_package_dir() -> PathBuf {
    PathBuf::from("/data/ota_package")
}
fn default_config_file_name() -> String {
    "ota_config.json".to_string()
}

/// System property names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceConfig {
    #[serde(default = "default_version_property")]
    pub version_property: String,

    #[serde(default = "default_model_property")]
    pub model_property: String,

    /// Reported when a property cannot be read
    #[serde(default = "default_unknown")]
    pub fallback_unknown: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version_property: default_version_property(),
            model_property: default_model_property(),
            fallback_unknown: default_unknown(),
        }
    }
}

fn default_version_property() -> String {
    "ro.vendor.software.version".to_string()
}
fn default_model_property() -> String {
    "ro.product.odm.model".to_string()
}
fn default_unknown() -> String {
    "Unknown".to_string()
}

/// Update engine client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Binary invoked to talk to the update engine
    #[serde(default = "default_client_binary")]
    pub client_binary: String,

    /// Switch to the new slot on the next reboot
    #[serde(default = "default_true")]
    pub switch_slot_on_reboot: bool,

    /// Run the post-install step after writing the payload
    #[serde(default = "default_true")]
    pub run_post_install: bool,

    /// Longest silence tolerated from a following engine client
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
}

impl EngineConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_binary: default_client_binary(),
            switch_slot_on_reboot: true,
            run_post_install: true,
            status_timeout_secs: default_status_timeout(),
        }
    }
}

fn default_client_binary() -> String {
    "update_engine_client".to_string()
}

fn default_status_timeout() -> u64 {
    600
}

/// Operation store housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Terminal records older than this are removed by cleanup
    #[serde(default = "default_stale_after")]
    pub stale_after_mins: u64,
}

impl StoreConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_mins * 60)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after_mins: default_stale_after(),
        }
    }
}

fn default_stale_after() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.network.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.network.max_config_size, 1024 * 1024);
        assert_eq!(config.network.download_chunk_size, 4096);
        assert_eq!(config.paths.config_file_name, "ota_config.json");
        assert_eq!(config.store.stale_after(), Duration::from_secs(3600));
        assert!(config.engine.switch_slot_on_reboot);
        assert_eq!(config.engine.status_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_yaml_keeps_field_defaults() {
        let yaml = r#"
network:
  read-timeout-secs: 45
engine:
  run-post-install: false
"#;
        let config: RuntimeConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.network.read_timeout_secs, 45);
        assert_eq!(config.network.connect_timeout_secs, 10);
        assert!(!config.engine.run_post_install);
        assert!(config.engine.switch_slot_on_reboot);
        assert_eq!(config.device.version_property, "ro.vendor.software.version");
    }

    #[test]
    fn test_explicit_paths_win() {
        let paths = PathsConfig {
            configs_dir: Some(PathBuf::from("/tmp/configs")),
            state_file: Some(PathBuf::from("/tmp/state.json")),
            ..Default::default()
        };
        assert_eq!(paths.configs_dir().unwrap(), PathBuf::from("/tmp/configs"));
        assert_eq!(paths.state_file().unwrap(), PathBuf::from("/tmp/state.json"));
    }
}
