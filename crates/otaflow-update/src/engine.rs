//! Update engine and package verifier capabilities
//!
//! The engine that writes payloads to the inactive slot is external. This
//! module defines the seams otaflow talks to it through, the status and
//! error-code vocabulary it reports in, and a default implementation that
//! drives the device's `update_engine_client` binary.

use async_trait::async_trait;
use otaflow_core::types::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{EngineError, VerifyError};
use crate::payload::PayloadSpec;

/// Property that keeps the current slot active after reboot
pub const PROPERTY_NO_SWITCH_SLOT: &str = "SWITCH_SLOT_ON_REBOOT=0";

/// Property that skips the post-install step
pub const PROPERTY_SKIP_POST_INSTALL: &str = "RUN_POST_INSTALL=0";

/// Extra engine properties implied by the runtime configuration
pub fn engine_properties(config: &EngineConfig) -> Vec<String> {
    let mut properties = Vec::new();
    if !config.switch_slot_on_reboot {
        properties.push(PROPERTY_NO_SWITCH_SLOT.to_string());
    }
    if !config.run_post_install {
        properties.push(PROPERTY_SKIP_POST_INSTALL.to_string());
    }
    properties
}

/// Coarse engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    CheckingForUpdate,
    UpdateAvailable,
    Downloading,
    Verifying,
    Finalizing,
    UpdatedNeedReboot,
    ReportingErrorEvent,
    AttemptingRollback,
    Disabled,
}

impl EngineStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Idle,
            1 => Self::CheckingForUpdate,
            2 => Self::UpdateAvailable,
            3 => Self::Downloading,
            4 => Self::Verifying,
            5 => Self::Finalizing,
            6 => Self::UpdatedNeedReboot,
            7 => Self::ReportingErrorEvent,
            8 => Self::AttemptingRollback,
            9 => Self::Disabled,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::CheckingForUpdate => "CHECKING_FOR_UPDATE",
            Self::UpdateAvailable => "UPDATE_AVAILABLE",
            Self::Downloading => "DOWNLOADING",
            Self::Verifying => "VERIFYING",
            Self::Finalizing => "FINALIZING",
            Self::UpdatedNeedReboot => "UPDATED_NEED_REBOOT",
            Self::ReportingErrorEvent => "REPORTING_ERROR_EVENT",
            Self::AttemptingRollback => "ATTEMPTING_ROLLBACK",
            Self::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name(), self.code())
    }
}

/// Completion code reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineErrorCode(pub i32);

impl EngineErrorCode {
    pub const SUCCESS: Self = Self(0);
    pub const ERROR: Self = Self(1);
    pub const FILESYSTEM_COPIER_ERROR: Self = Self(4);
    pub const POST_INSTALL_RUNNER_ERROR: Self = Self(5);
    pub const PAYLOAD_MISMATCHED_TYPE_ERROR: Self = Self(6);
    pub const INSTALL_DEVICE_OPEN_ERROR: Self = Self(7);
    pub const KERNEL_DEVICE_OPEN_ERROR: Self = Self(8);
    pub const DOWNLOAD_TRANSFER_ERROR: Self = Self(9);
    pub const PAYLOAD_HASH_MISMATCH_ERROR: Self = Self(10);
    pub const PAYLOAD_SIZE_MISMATCH_ERROR: Self = Self(11);
    pub const DOWNLOAD_PAYLOAD_VERIFICATION_ERROR: Self = Self(12);
    pub const PAYLOAD_TIMESTAMP_ERROR: Self = Self(51);
    pub const UPDATED_BUT_NOT_ACTIVE: Self = Self(52);

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "SUCCESS",
            1 => "ERROR",
            4 => "FILESYSTEM_COPIER_ERROR",
            5 => "POST_INSTALL_RUNNER_ERROR",
            6 => "PAYLOAD_MISMATCHED_TYPE_ERROR",
            7 => "INSTALL_DEVICE_OPEN_ERROR",
            8 => "KERNEL_DEVICE_OPEN_ERROR",
            9 => "DOWNLOAD_TRANSFER_ERROR",
            10 => "PAYLOAD_HASH_MISMATCH_ERROR",
            11 => "PAYLOAD_SIZE_MISMATCH_ERROR",
            12 => "DOWNLOAD_PAYLOAD_VERIFICATION_ERROR",
            51 => "PAYLOAD_TIMESTAMP_ERROR",
            52 => "UPDATED_BUT_NOT_ACTIVE",
            _ => "UNKNOWN",
        }
    }

    /// Success, including "written but slot switch deferred"
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS || self == Self::UPDATED_BUT_NOT_ACTIVE
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name(), self.0)
    }
}

/// Item of the apply status stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineUpdate {
    Status(EngineStatus),
    /// Final item; the stream ends after it
    Completed(EngineErrorCode),
}

/// The external update-application engine
#[async_trait]
pub trait UpdateEngine: Send + Sync {
    /// Ask the engine whether the payload metadata fits this device
    async fn verify_payload_metadata(&self, metadata: &Path) -> Result<bool, EngineError>;

    /// Start applying `spec`. `handle` identifies the operation in logs.
    async fn apply_payload(
        &self,
        spec: &PayloadSpec,
        handle: &str,
    ) -> Result<mpsc::Receiver<EngineUpdate>, EngineError>;
}

/// The external package compatibility check
#[async_trait]
pub trait PackageVerifier: Send + Sync {
    /// `Ok(false)` means the package is not compatible with this device
    async fn verify_package(&self, package: &Path) -> Result<bool, VerifyError>;
}

/// Engine backed by the `update_engine_client` command
pub struct UpdateEngineClient {
    binary: String,
    status_timeout: Duration,
}

impl UpdateEngineClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            binary: config.client_binary.clone(),
            status_timeout: config.status_timeout(),
        }
    }
}

#[async_trait]
impl UpdateEngine for UpdateEngineClient {
    async fn verify_payload_metadata(&self, metadata: &Path) -> Result<bool, EngineError> {
        let status = Command::new(&self.binary)
            .arg("--verify")
            .arg(format!("--metadata={}", metadata.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        debug!("{} --verify exited with {}", self.binary, status);
        Ok(status.success())
    }

    async fn apply_payload(
        &self,
        spec: &PayloadSpec,
        handle: &str,
    ) -> Result<mpsc::Receiver<EngineUpdate>, EngineError> {
        info!("Applying payload {} for {}", spec.url(), handle);

        let mut child = Command::new(&self.binary)
            .arg("--update")
            .arg("--follow")
            .arg(format!("--payload={}", spec.url()))
            .arg(format!("--offset={}", spec.offset()))
            .arg(format!("--size={}", spec.size()))
            .arg(format!("--headers={}", spec.properties().join("\n")))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Rejected("no stdout from engine client".to_string()))?;
        let stderr = child.stderr.take().map(|stderr| {
            let binary = self.binary.clone();
            tokio::spawn(async move { drain_stderr(&binary, stderr).await })
        });

        let (tx, rx) = mpsc::channel(32);
        let binary = self.binary.clone();
        let status_timeout = self.status_timeout;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut completed = false;
            loop {
                let line = match timeout(status_timeout, lines.next_line()).await {
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        warn!("Failed to read from {}: {}", binary, e);
                        break;
                    }
                    Err(_) => {
                        warn!(
                            "{} reported nothing for {:?}, stopping it",
                            binary, status_timeout
                        );
                        if let Err(e) = child.kill().await {
                            warn!("Failed to stop {}: {}", binary, e);
                        }
                        let _ = tx.send(EngineUpdate::Completed(EngineErrorCode::ERROR)).await;
                        return;
                    }
                };
                debug!("{}: {}", binary, line);
                if let Some(update) = parse_client_line(&line) {
                    completed = matches!(update, EngineUpdate::Completed(_));
                    if tx.send(update).await.is_err() || completed {
                        break;
                    }
                }
            }
            if completed {
                return;
            }

            let exit = match timeout(status_timeout, child.wait()).await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!("{} closed its output but did not exit, stopping it", binary);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to stop {}: {}", binary, e);
                    }
                    child.wait().await
                }
            };
            let err_output = match stderr {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            let code = match exit {
                Ok(status) if status.success() => EngineErrorCode::SUCCESS,
                Ok(status) => {
                    warn!("{} exited with {}: {}", binary, status, err_output.trim());
                    EngineErrorCode::ERROR
                }
                Err(e) => {
                    warn!("Failed to wait for {}: {}", binary, e);
                    EngineErrorCode::ERROR
                }
            };
            let _ = tx.send(EngineUpdate::Completed(code)).await;
        });

        Ok(rx)
    }
}

/// Read the client's stderr to the end, keeping only its tail
async fn drain_stderr(binary: &str, mut stderr: ChildStderr) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                }
            }
            Err(e) => {
                debug!("Failed to read stderr of {}: {}", binary, e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// Parse one line of `update_engine_client --follow` output
///
/// Status lines look like `onStatusUpdate(UPDATE_STATUS_DOWNLOADING (3), 0.25)`
/// and the final line like `onPayloadApplicationComplete(ErrorCode::kSuccess (0))`.
fn parse_client_line(line: &str) -> Option<EngineUpdate> {
    if line.contains("onPayloadApplicationComplete") {
        let code = parenthesized_codes(line).last().copied()?;
        return Some(EngineUpdate::Completed(EngineErrorCode(code)));
    }
    if line.contains("onStatusUpdate") {
        let code = parenthesized_codes(line).first().copied()?;
        return EngineStatus::from_code(code).map(EngineUpdate::Status);
    }
    None
}

/// Integers written as `(n)` in a line
fn parenthesized_codes(line: &str) -> Vec<i32> {
    line.split('(')
        .skip(1)
        .filter_map(|part| part.split(')').next())
        .filter_map(|inner| inner.trim().parse::<i32>().ok())
        .collect()
}

/// Verifier that checks the package is a readable zip archive
pub struct ZipSignatureVerifier;

const STDERR_TAIL_BYTES: usize = 4096;

const ZIP_LOCAL_HEADER: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

#[async_trait]
impl PackageVerifier for ZipSignatureVerifier {
    async fn verify_package(&self, package: &Path) -> Result<bool, VerifyError> {
        let mut file = tokio::fs::File::open(package).await?;
        let mut header = [0u8; 4];
        match file.read_exact(&mut header).await {
            Ok(_) => Ok(header == ZIP_LOCAL_HEADER),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(VerifyError::Io(e)),
        }
    }
}
