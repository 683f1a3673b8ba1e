//! Error types for otaflow-update
//!
//! Every error maps onto [`ErrorKind`] so observers can decide how much of
//! it to show. Internal detail is logged where the error is raised; what
//! reaches observers is [`DownloadError::user_message`] and friends.

use otaflow_core::ErrorKind;
use thiserror::Error;

/// Shown for every failed network operation
pub const NETWORK_ERROR_MESSAGE: &str = "Please check your network connection and try again.";

/// Shown when a downloaded config cannot be used
pub const NO_NEW_VERSION_MESSAGE: &str = "No new version found.";

/// Byte range download failures
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport level failure (connect, TLS, body stream)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP error: {status}{}", body_suffix(.body))]
    HttpStatus { status: u16, body: String },

    /// No data arrived within the read timeout
    #[error("Timed out after {secs}s waiting for data")]
    Timeout { secs: u64 },

    /// The source ended before the requested offset was reached
    #[error("Cannot skip to offset {offset}: only {available} bytes available")]
    OffsetUnsatisfiable { offset: u64, available: u64 },

    /// The source ended before `expected` bytes were delivered
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// Declared or accumulated length exceeds the ceiling
    #[error("Content too large: {size} bytes exceeds limit of {limit} bytes")]
    ContentTooLarge { size: u64, limit: u64 },

    /// Neither http(s) nor file URL, or a malformed one
    #[error("Unsupported URL: {url}")]
    UnsupportedUrl { url: String },

    /// Negative size other than the unbounded sentinel
    #[error("Invalid byte range: offset {offset}, size {size}")]
    InvalidRange { offset: u64, size: i64 },

    /// Local file failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {}", body)
    }
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Network
    }

    /// Every download failure is a network error from the caller's view
    pub fn is_network(&self) -> bool {
        true
    }

    pub fn user_message(&self) -> &'static str {
        NETWORK_ERROR_MESSAGE
    }
}

/// Config document fetch failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Server returned an HTML page instead of a config document
    #[error("Downloaded content appears to be HTML, not JSON")]
    HtmlContent,

    /// The config URL has no `update` segment to place the product model after
    #[error("Config URL has no 'update' segment: {url}")]
    UrlRewrite { url: String },

    /// The document is not a valid update config
    #[error("Invalid update config: {0}")]
    InvalidDocument(#[from] otaflow_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Download(_) | Self::HtmlContent | Self::Io(_) => ErrorKind::Network,
            Self::UrlRewrite { .. } => ErrorKind::Precondition,
            Self::InvalidDocument(e) => e.kind(),
        }
    }

    /// Short reason for observers
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Download(_) | Self::HtmlContent | Self::Io(_) | Self::UrlRewrite { .. } => {
                NETWORK_ERROR_MESSAGE
            }
            Self::InvalidDocument(_) => NO_NEW_VERSION_MESSAGE,
        }
    }
}

/// Payload preparation failures
#[derive(Error, Debug)]
pub enum PrepareError {
    /// The update engine rejected the payload metadata
    #[error("Payload metadata is not compatible")]
    IncompatiblePayload,

    /// Non-streaming package could not be fetched
    #[error("Failed to download update package: {reason}")]
    PackageDownloadFailed { reason: String },

    /// A file the install needs is not declared or not present
    #[error("{filename} not found")]
    MissingRequiredFile { filename: String },

    /// The compatibility verifier rejected the package
    #[error("OTA package is not compatible with this device")]
    IncompatiblePackage,

    /// The verifier hit a security-layer failure; not recoverable
    #[error("Package verifier security failure: {0}")]
    VerifierSecurity(String),

    /// The payload descriptor could not be built
    #[error("Invalid payload spec: {reason}")]
    InvalidSpec { reason: String },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrepareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IncompatiblePayload | Self::IncompatiblePackage => ErrorKind::Incompatibility,
            Self::MissingRequiredFile { .. } | Self::InvalidSpec { .. } => ErrorKind::Precondition,
            Self::PackageDownloadFailed { .. } | Self::Download(_) => ErrorKind::Network,
            Self::VerifierSecurity(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Reason string carried by `PrepareFailed`
    pub fn user_message(&self) -> String {
        format!("Update preparation failed: {}", self)
    }
}

/// Verifier outcome other than a plain incompatibility
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Reading the package failed; counts as incompatible
    #[error("IO error during verification: {0}")]
    Io(#[from] std::io::Error),

    /// Signature or trust store failure
    #[error("Security failure during verification: {0}")]
    Security(String),
}

/// Update engine invocation failures
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to run update engine client: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Update engine rejected the request: {0}")]
    Rejected(String),
}

/// Operation store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Failed to serialize records: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A terminal record cannot move back to an earlier status
    #[error("Status of {id} cannot move from {from} to {to}")]
    StatusRegression {
        id: String,
        from: String,
        to: String,
    },

    #[error("No record with id {id}")]
    NotFound { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StatusRegression { .. } | Self::NotFound { .. } => ErrorKind::Precondition,
            _ => ErrorKind::Internal,
        }
    }
}

/// Orchestrator trigger failures
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Trigger not valid in the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    /// A background operation of this category is already running
    #[error("A {0} is already in progress")]
    Busy(&'static str),

    /// Install requested but no config has been accepted
    #[error("No update configuration selected")]
    NoConfigSelected,

    /// Background work was requested outside a tokio runtime
    #[error("No async runtime available to run the {0}")]
    NoRuntime(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] otaflow_core::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } | Self::Busy(_) | Self::NoConfigSelected => {
                ErrorKind::Precondition
            }
            Self::NoRuntime(_) => ErrorKind::Internal,
            Self::Store(e) => e.kind(),
            Self::Fetch(e) => e.kind(),
            Self::Config(e) => e.kind(),
        }
    }

    /// Short reason for observers
    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch(e) => e.user_message().to_string(),
            Self::Config(_) => NO_NEW_VERSION_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
