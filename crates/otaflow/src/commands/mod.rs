//! CLI command implementations

pub mod check;
pub mod cleanup;
pub mod configs;
pub mod reset;
pub mod status;
pub mod version;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use otaflow_core::{HierarchicalConfigLoader, RuntimeConfig};
use otaflow_update::device::{DeviceInfo, SystemPropertyDevice, VersionOverride};
use otaflow_update::store::OperationStore;
use std::sync::Arc;
use tracing::debug;

/// Flags shared by every subcommand
#[derive(Debug, Default)]
pub struct GlobalOptions {
    pub device_version: Option<String>,
    pub state_file: Option<Utf8PathBuf>,
}

/// Runtime configuration with CLI overrides applied
pub fn load_runtime(global: &GlobalOptions) -> Result<RuntimeConfig> {
    let loader =
        HierarchicalConfigLoader::new().context("Failed to locate the otaflow config directory")?;
    let mut runtime = loader
        .load_runtime_config()
        .context("Failed to load runtime configuration")?;

    if let Some(path) = &global.state_file {
        runtime.paths.state_file = Some(path.clone().into_std_path_buf());
    }
    Ok(runtime)
}

pub fn open_store(runtime: &RuntimeConfig) -> Result<Arc<OperationStore>> {
    let path = runtime.paths.state_file()?;
    debug!("Using operation store {}", path.display());
    Ok(Arc::new(OperationStore::open(path)))
}

/// The device as seen through system properties, optionally reporting a
/// different software version
pub fn device_info(runtime: &RuntimeConfig, global: &GlobalOptions) -> Arc<dyn DeviceInfo> {
    let device = SystemPropertyDevice::new(runtime.device.clone());
    match &global.device_version {
        Some(version) => Arc::new(VersionOverride::new(device, version.clone())),
        None => Arc::new(device),
    }
}
