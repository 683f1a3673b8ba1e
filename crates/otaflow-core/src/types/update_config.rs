//! Update config documents
//!
//! One JSON document describes one available update: where the package
//! lives, how it is installed and which files inside the package are
//! needed before installation can start.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use url::Url;

use crate::error::{Error, Result};

/// Marker separating a config's display name from its version
pub const VERSION_TOKEN_MARKER: &str = "_Ver";

/// How the update engine consumes the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallType {
    /// Payload bytes are read directly from the remote package
    Streaming,
    /// The whole package is downloaded before installation
    NonStreaming,
}

impl std::fmt::Display for InstallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => write!(f, "STREAMING"),
            Self::NonStreaming => write!(f, "NON_STREAMING"),
        }
    }
}

/// A file stored inside the update package, located by byte range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    pub filename: String,
    pub offset: u64,
    pub size: u64,
}

/// A/B specific part of an update config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbConfig {
    /// Verify payload metadata with the update engine before preparing
    #[serde(default)]
    pub verify_payload_metadata: bool,

    /// Files inside the package, in declaration order
    #[serde(default)]
    pub property_files: Vec<PackageFile>,
}

/// A parsed update config document. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    pub name: String,
    pub url: String,

    #[serde(rename = "ab_install_type", alias = "install_type")]
    pub install_type: InstallType,

    #[serde(default)]
    pub ab_config: AbConfig,
}

impl UpdateConfig {
    /// Parse a config document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: UpdateConfig = serde_json::from_str(json)?;
        if config.name.trim().is_empty() {
            return Err(Error::missing_field("name"));
        }
        if config.url.trim().is_empty() {
            return Err(Error::missing_field("url"));
        }
        Ok(config)
    }

    /// Version string embedded in the name after `_Ver`
    ///
    /// `Foo_Incremental_Ver5.0.0` yields `5.0.0`.
    pub fn version_token(&self) -> Result<&str> {
        self.name
            .split_once(VERSION_TOKEN_MARKER)
            .map(|(_, rest)| rest.split(VERSION_TOKEN_MARKER).next().unwrap_or(rest))
            .ok_or_else(|| Error::malformed_config_name(&self.name))
    }

    /// Whether this config describes an incremental (delta) package
    pub fn is_incremental(&self) -> bool {
        self.name.contains("Incremental")
    }

    /// Look up a declared property file by exact name
    pub fn property_file(&self, filename: &str) -> Option<&PackageFile> {
        self.ab_config
            .property_files
            .iter()
            .find(|f| f.filename == filename)
    }

    /// Local package path when the config points at a `file://` URL
    pub fn local_package_file(&self) -> Option<PathBuf> {
        let url = Url::parse(&self.url).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        url.to_file_path().ok()
    }
}

/// Display names of the given configs
pub fn config_names(configs: &[UpdateConfig]) -> Vec<String> {
    configs.iter().map(|c| c.name.clone()).collect()
}

/// Load every `*.json` config document in `dir`
///
/// A missing directory yields an empty list. Any unreadable or malformed
/// document fails the whole load. Results are ordered by file name.
pub fn load_update_configs(dir: &Path) -> Result<Vec<UpdateConfig>> {
    if !dir.exists() {
        debug!("Configs directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut configs = Vec::with_capacity(files.len());
    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = fs::read_to_string(&path)?;
        let config: UpdateConfig = serde_json::from_str(&content).map_err(|e| {
            error!("Can't read/parse config file {}: {}", file_name, e);
            Error::config_parse(&file_name, e)
        })?;
        configs.push(config);
    }

    Ok(configs)
}
