//! Error types for otaflow-core

use thiserror::Error;

/// Result type alias using otaflow-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification shared by every otaflow error type.
///
/// Observers use this to decide how a failure is presented: network and
/// parse problems get a generic message, configuration defects are reported
/// as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, HTTP failures, short reads, oversized content
    Network,
    /// Malformed JSON documents or version strings
    Parse,
    /// Metadata or package verification rejected the update
    Incompatibility,
    /// Missing declared files, malformed config names, bad transitions
    Precondition,
    /// Local I/O and store failures
    Internal,
}

/// Core error types for otaflow
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An update config document on disk could not be parsed
    #[error("Failed to parse update config {file}: {source}")]
    ConfigParse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A version string has a non-numeric component
    #[error("Invalid version format: {version}")]
    InvalidVersionFormat { version: String },

    /// A config name does not carry a `_Ver` version token
    #[error("Config name '{name}' does not contain a _Ver version token")]
    MalformedConfigName { name: String },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersionFormat {
            version: version.into(),
        }
    }

    /// Create a malformed config name error
    pub fn malformed_config_name(name: impl Into<String>) -> Self {
        Self::MalformedConfigName { name: name.into() }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn config_parse(file: impl Into<String>, source: serde_json::Error) -> Self {
        Self::ConfigParse {
            file: file.into(),
            source,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::YamlParse(_)
            | Self::JsonParse(_)
            | Self::ConfigParse { .. }
            | Self::InvalidVersionFormat { .. } => ErrorKind::Parse,
            Self::MalformedConfigName { .. } | Self::MissingField { .. } => {
                ErrorKind::Precondition
            }
            Self::ConfigNotFound { .. } | Self::InvalidConfig { .. } | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}
