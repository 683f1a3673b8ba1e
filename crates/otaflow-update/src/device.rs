//! Device identity: installed software version and product model

use otaflow_core::types::DeviceConfig;
use std::process::Command;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Path segment the product model is inserted after
const UPDATE_SEGMENT: &str = "update";

/// Source of the device's version and model
pub trait DeviceInfo: Send + Sync {
    /// Installed software version, e.g. `1.5.0`
    fn software_version(&self) -> String;

    /// Product model used to select per-model config URLs
    fn product_model(&self) -> String;
}

/// Reads device identity from system properties via `getprop`
#[derive(Debug, Clone)]
pub struct SystemPropertyDevice {
    config: DeviceConfig,
}

impl SystemPropertyDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn read_property(&self, name: &str) -> String {
        let value = match Command::new("getprop").arg(name).output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            Ok(output) => {
                debug!("getprop {} exited with {}", name, output.status);
                String::new()
            }
            Err(e) => {
                warn!("Failed to read system property {}: {}", name, e);
                String::new()
            }
        };

        if value.is_empty() {
            self.config.fallback_unknown.clone()
        } else {
            value
        }
    }
}

impl DeviceInfo for SystemPropertyDevice {
    fn software_version(&self) -> String {
        self.read_property(&self.config.version_property)
    }

    fn product_model(&self) -> String {
        self.read_property(&self.config.model_property)
    }
}

/// Fixed device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDevice {
    pub version: String,
    pub model: String,
}

impl StaticDevice {
    pub fn new(version: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            model: model.into(),
        }
    }
}

impl DeviceInfo for StaticDevice {
    fn software_version(&self) -> String {
        self.version.clone()
    }

    fn product_model(&self) -> String {
        self.model.clone()
    }
}

/// Device identity with the software version replaced
pub struct VersionOverride<D> {
    inner: D,
    version: String,
}

impl<D: DeviceInfo> VersionOverride<D> {
    pub fn new(inner: D, version: impl Into<String>) -> Self {
        Self {
            inner,
            version: version.into(),
        }
    }
}

impl<D: DeviceInfo> DeviceInfo for VersionOverride<D> {
    fn software_version(&self) -> String {
        self.version.clone()
    }

    fn product_model(&self) -> String {
        self.inner.product_model()
    }
}

/// Insert `/<model>` (lowercased) after the first `update` in `url`
///
/// `https://host/update/full/ota_config.json` with model `X1` becomes
/// `https://host/update/x1/full/ota_config.json`.
pub fn device_config_url(url: &str, model: &str) -> Result<String, FetchError> {
    let index = url.find(UPDATE_SEGMENT).ok_or_else(|| FetchError::UrlRewrite {
        url: url.to_string(),
    })?;
    let split = index + UPDATE_SEGMENT.len();

    Ok(format!(
        "{}/{}{}",
        &url[..split],
        model.to_lowercase(),
        &url[split..]
    ))
}
