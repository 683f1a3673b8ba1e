//! Builder patterns for test data construction

use otaflow_core::types::{PackageFile, UpdateConfig};
use serde_json::json;

use super::constants::*;

/// Builder for update config documents
#[derive(Debug, Clone)]
pub struct UpdateConfigBuilder {
    name: String,
    url: String,
    install_type: String,
    verify_payload_metadata: bool,
    property_files: Vec<PackageFile>,
}

impl UpdateConfigBuilder {
    pub fn new() -> Self {
        Self {
            name: CONFIG_FULL_2_0_0.to_string(),
            url: "https://ota.example.com/packages/foo.zip".to_string(),
            install_type: "NON_STREAMING".to_string(),
            verify_payload_metadata: false,
            property_files: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn streaming(mut self) -> Self {
        self.install_type = "STREAMING".to_string();
        self
    }

    pub fn non_streaming(mut self) -> Self {
        self.install_type = "NON_STREAMING".to_string();
        self
    }

    pub fn verify_metadata(mut self) -> Self {
        self.verify_payload_metadata = true;
        self
    }

    pub fn file(mut self, filename: &str, offset: u64, size: u64) -> Self {
        self.property_files.push(PackageFile {
            filename: filename.to_string(),
            offset,
            size,
        });
        self
    }

    pub fn files(mut self, files: Vec<PackageFile>) -> Self {
        self.property_files.extend(files);
        self
    }

    pub fn to_json(&self) -> String {
        let files: Vec<_> = self
            .property_files
            .iter()
            .map(|f| json!({"filename": f.filename, "offset": f.offset, "size": f.size}))
            .collect();
        json!({
            "name": self.name,
            "url": self.url,
            "ab_install_type": self.install_type,
            "ab_config": {
                "verify_payload_metadata": self.verify_payload_metadata,
                "property_files": files,
            }
        })
        .to_string()
    }

    pub fn build(&self) -> UpdateConfig {
        UpdateConfig::from_json(&self.to_json()).expect("builder produces valid configs")
    }
}

impl Default for UpdateConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Packs named entries back to back, the way an OTA zip stores them
/// uncompressed, and records each entry's offset and size
#[derive(Debug, Default)]
pub struct PackageBuilder {
    bytes: Vec<u8>,
    files: Vec<PackageFile>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self {
            bytes: b"PK\x03\x04package-header".to_vec(),
            files: Vec::new(),
        }
    }

    pub fn entry(mut self, filename: &str, content: &[u8]) -> Self {
        self.files.push(PackageFile {
            filename: filename.to_string(),
            offset: self.bytes.len() as u64,
            size: content.len() as u64,
        });
        self.bytes.extend_from_slice(content);
        self
    }

    /// Every entry of a complete streaming package
    pub fn streaming_package() -> Self {
        Self::new()
            .entry("payload_metadata.bin", METADATA_BYTES)
            .entry("care_map.txt", CARE_MAP_BYTES)
            .entry("compatibility.zip", COMPAT_ZIP_BYTES)
            .entry("payload.bin", PAYLOAD_BYTES)
            .entry("payload_properties.txt", PROPERTIES_CONTENT)
    }

    pub fn build(self) -> (Vec<u8>, Vec<PackageFile>) {
        (self.bytes, self.files)
    }
}
