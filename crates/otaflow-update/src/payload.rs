//! Payload descriptors handed to the update engine

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::download::UNBOUNDED_SIZE;
use crate::error::PrepareError;

/// Well-known files inside an A/B update package
pub mod files {
    pub const CARE_MAP: &str = "care_map.txt";
    pub const COMPATIBILITY_ZIP: &str = "compatibility.zip";
    pub const PAYLOAD_METADATA: &str = "payload_metadata.bin";
    pub const PAYLOAD_BINARY: &str = "payload.bin";
    pub const PAYLOAD_PROPERTIES: &str = "payload_properties.txt";

    /// Files fetched before a streaming install can be verified and started
    pub const PRE_STREAMING: [&str; 4] =
        [CARE_MAP, COMPATIBILITY_ZIP, PAYLOAD_METADATA, PAYLOAD_PROPERTIES];

    pub fn is_pre_streaming(filename: &str) -> bool {
        PRE_STREAMING.contains(&filename)
    }
}

/// Resolved description of a payload: where to read it and how to apply it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSpec {
    url: String,
    offset: u64,
    size: i64,
    properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties_file: Option<PathBuf>,
}

impl PayloadSpec {
    pub fn builder() -> PayloadSpecBuilder {
        PayloadSpecBuilder::default()
    }

    /// Spec for a fully downloaded local package
    pub fn for_non_streaming(package: &Path) -> Result<Self, PrepareError> {
        let package = fs::canonicalize(package)?;
        let len = fs::metadata(&package)?.len();
        let url = Url::from_file_path(&package).map_err(|_| PrepareError::InvalidSpec {
            reason: format!("{} cannot be expressed as a file URL", package.display()),
        })?;

        Self::builder()
            .url(url.to_string())
            .offset(0)
            .size(len as i64)
            .build()
    }

    /// Spec for a payload streamed from `url`, with engine properties read
    /// from the downloaded `payload_properties.txt`
    pub fn for_streaming(
        url: &str,
        offset: u64,
        size: u64,
        properties_file: &Path,
    ) -> Result<Self, PrepareError> {
        let content = fs::read_to_string(properties_file)?;
        let properties = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        Self::builder()
            .url(url)
            .offset(offset)
            .size(size as i64)
            .properties(properties)
            .properties_file(properties_file)
            .build()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte size, or `-1` for the rest of a local file
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn properties_file(&self) -> Option<&Path> {
        self.properties_file.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.url.starts_with("file://")
    }

    /// A copy with `extra` appended to the properties
    pub fn with_extra_properties(&self, extra: &[String]) -> Self {
        let mut spec = self.clone();
        spec.properties.extend(extra.iter().cloned());
        spec
    }
}

#[derive(Debug, Default)]
pub struct PayloadSpecBuilder {
    url: Option<String>,
    offset: u64,
    size: i64,
    properties: Vec<String>,
    properties_file: Option<PathBuf>,
}

impl PayloadSpecBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    pub fn properties(mut self, properties: Vec<String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn properties_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.properties_file = Some(path.into());
        self
    }

    pub fn build(self) -> Result<PayloadSpec, PrepareError> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PrepareError::InvalidSpec {
                reason: "url is required".to_string(),
            })?;

        if self.size < UNBOUNDED_SIZE {
            return Err(PrepareError::InvalidSpec {
                reason: format!("size {} is negative", self.size),
            });
        }
        if self.size == UNBOUNDED_SIZE && !url.starts_with("file://") {
            return Err(PrepareError::InvalidSpec {
                reason: "unbounded size requires a local file".to_string(),
            });
        }

        Ok(PayloadSpec {
            url,
            offset: self.offset,
            size: self.size,
            properties: self.properties,
            properties_file: self.properties_file,
        })
    }
}
