//! Payload preparation
//!
//! Turns a selected [`UpdateConfig`] into a [`PayloadSpec`] the update
//! engine can apply: optional metadata verification, then either a full
//! package download (non-streaming) or the small pre-streaming files plus a
//! compatibility check (streaming).

use otaflow_core::types::{InstallType, UpdateConfig};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::download::{ByteRange, RangeDownloader};
use crate::engine::{PackageVerifier, UpdateEngine};
use crate::error::{OrchestratorError, PrepareError, VerifyError};
use crate::events::{EventBus, UpdateEvent};
use crate::payload::{files, PayloadSpec};
use crate::store::{ActiveUpdate, LastUpdateConfig, OperationStore, UpdateProgress, UpdateStatus};
use crate::tasks::TaskSlot;

/// Name of the fully downloaded non-streaming package
pub const PACKAGE_FILE_NAME: &str = "update.zip";

/// Preparation milestones, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStep {
    VerifyingMetadata,
    CheckingInstallType,
    DownloadingPackage,
    SettingPermissions,
    PackageReady,
    /// `done` of `total` declared property files fetched
    DownloadingPropertyFiles { done: usize, total: usize },
    CheckingPayload,
    VerifyingCompatibility,
    Finalizing,
}

impl PrepareStep {
    pub fn percent(self) -> u8 {
        match self {
            Self::VerifyingMetadata => 10,
            Self::CheckingInstallType => 20,
            Self::DownloadingPackage => 30,
            Self::SettingPermissions => 70,
            Self::PackageReady => 80,
            Self::DownloadingPropertyFiles { done, total } => {
                if total == 0 {
                    40
                } else {
                    (40 + done.min(total) * 30 / total) as u8
                }
            }
            Self::CheckingPayload => 70,
            Self::VerifyingCompatibility => 80,
            Self::Finalizing => 90,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::VerifyingMetadata => "Verifying payload metadata",
            Self::CheckingInstallType => "Checking install type",
            Self::DownloadingPackage => "Downloading update package",
            Self::SettingPermissions => "Setting package permissions",
            Self::PackageReady => "Package ready",
            Self::DownloadingPropertyFiles { .. } => "Downloading property files",
            Self::CheckingPayload => "Checking payload",
            Self::VerifyingCompatibility => "Verifying compatibility",
            Self::Finalizing => "Finalizing",
        }
    }
}

/// Builds payload specs from update configs
pub struct PayloadPreparer {
    downloader: RangeDownloader,
    engine: Arc<dyn UpdateEngine>,
    verifier: Arc<dyn PackageVerifier>,
    package_dir: PathBuf,
}

impl PayloadPreparer {
    pub fn new(
        downloader: RangeDownloader,
        engine: Arc<dyn UpdateEngine>,
        verifier: Arc<dyn PackageVerifier>,
        package_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            engine,
            verifier,
            package_dir: package_dir.into(),
        }
    }

    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    /// Resolve `config` into a payload spec, reporting each milestone
    pub async fn prepare<F>(
        &self,
        config: &UpdateConfig,
        mut on_step: F,
    ) -> Result<PayloadSpec, PrepareError>
    where
        F: FnMut(PrepareStep) + Send,
    {
        info!("Preparing {} ({})", config.name, config.install_type);
        tokio::fs::create_dir_all(&self.package_dir).await?;

        on_step(PrepareStep::VerifyingMetadata);
        if config.ab_config.verify_payload_metadata && !self.verify_metadata(config).await {
            return Err(PrepareError::IncompatiblePayload);
        }

        on_step(PrepareStep::CheckingInstallType);
        match config.install_type {
            InstallType::NonStreaming => self.prepare_non_streaming(config, &mut on_step).await,
            InstallType::Streaming => self.prepare_streaming(config, &mut on_step).await,
        }
    }

    /// Only an explicit rejection from the engine fails verification.
    /// Missing declarations, download failures and engine errors skip it.
    async fn verify_metadata(&self, config: &UpdateConfig) -> bool {
        let Some(metadata) = config.property_file(files::PAYLOAD_METADATA) else {
            warn!(
                "{} requests metadata verification but declares no {}",
                config.name,
                files::PAYLOAD_METADATA
            );
            return true;
        };

        let path = self.package_dir.join(files::PAYLOAD_METADATA);
        if let Err(e) = remove_stale(&path).await {
            warn!("Failed to remove stale {}: {}", path.display(), e);
        }

        let range = ByteRange::bounded(metadata.offset, metadata.size);
        if let Err(e) = self.downloader.download(&config.url, range, &path).await {
            warn!("Skipping metadata verification, download failed: {}", e);
            return true;
        }

        match self.engine.verify_payload_metadata(&path).await {
            Ok(compatible) => {
                debug!("Metadata verification returned {}", compatible);
                compatible
            }
            Err(e) => {
                warn!("Skipping metadata verification, engine error: {}", e);
                true
            }
        }
    }

    async fn prepare_non_streaming<F>(
        &self,
        config: &UpdateConfig,
        on_step: &mut F,
    ) -> Result<PayloadSpec, PrepareError>
    where
        F: FnMut(PrepareStep) + Send,
    {
        on_step(PrepareStep::DownloadingPackage);

        let package = match config.local_package_file() {
            Some(local) => {
                if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
                    return Err(PrepareError::PackageDownloadFailed {
                        reason: format!("{} does not exist", local.display()),
                    });
                }
                local
            }
            None => {
                let destination = self.package_dir.join(PACKAGE_FILE_NAME);
                self.downloader
                    .download(&config.url, ByteRange::whole(), &destination)
                    .await
                    .map_err(|e| {
                        error!("Package download from {} failed: {}", config.url, e);
                        PrepareError::PackageDownloadFailed {
                            reason: e.to_string(),
                        }
                    })?;

                on_step(PrepareStep::SettingPermissions);
                set_package_permissions(&destination).await;
                destination
            }
        };

        on_step(PrepareStep::PackageReady);
        PayloadSpec::for_non_streaming(&package)
    }

    async fn prepare_streaming<F>(
        &self,
        config: &UpdateConfig,
        on_step: &mut F,
    ) -> Result<PayloadSpec, PrepareError>
    where
        F: FnMut(PrepareStep) + Send,
    {
        let total = config.ab_config.property_files.len();
        let mut done = 0;
        on_step(PrepareStep::DownloadingPropertyFiles { done, total });

        for name in files::PRE_STREAMING {
            remove_stale(&self.package_dir.join(name)).await?;
        }

        for file in config
            .ab_config
            .property_files
            .iter()
            .filter(|f| files::is_pre_streaming(&f.filename))
        {
            let destination = self.package_dir.join(&file.filename);
            debug!(
                "Downloading {} (offset {}, size {})",
                file.filename, file.offset, file.size
            );
            self.downloader
                .download(
                    &config.url,
                    ByteRange::bounded(file.offset, file.size),
                    &destination,
                )
                .await?;
            done += 1;
            on_step(PrepareStep::DownloadingPropertyFiles { done, total });
        }

        on_step(PrepareStep::CheckingPayload);
        let payload = config
            .property_file(files::PAYLOAD_BINARY)
            .ok_or_else(|| missing(files::PAYLOAD_BINARY))?;
        if config.property_file(files::PAYLOAD_PROPERTIES).is_none() {
            return Err(missing(files::PAYLOAD_PROPERTIES));
        }
        let properties = self.package_dir.join(files::PAYLOAD_PROPERTIES);
        if !tokio::fs::try_exists(&properties).await.unwrap_or(false) {
            return Err(missing(files::PAYLOAD_PROPERTIES));
        }

        on_step(PrepareStep::VerifyingCompatibility);
        let compatibility = self.package_dir.join(files::COMPATIBILITY_ZIP);
        if tokio::fs::metadata(&compatibility)
            .await
            .is_ok_and(|m| m.is_file())
        {
            match self.verifier.verify_package(&compatibility).await {
                Ok(true) => debug!("Package compatibility verified"),
                Ok(false) => return Err(PrepareError::IncompatiblePackage),
                Err(VerifyError::Io(e)) => return Err(PrepareError::Io(e)),
                Err(VerifyError::Security(reason)) => {
                    error!("Package verifier security failure: {}", reason);
                    return Err(PrepareError::VerifierSecurity(reason));
                }
            }
        }

        on_step(PrepareStep::Finalizing);
        PayloadSpec::for_streaming(&config.url, payload.offset, payload.size, &properties)
    }
}

fn missing(filename: &str) -> PrepareError {
    PrepareError::MissingRequiredFile {
        filename: filename.to_string(),
    }
}

async fn remove_stale(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != IoErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Make the package readable by the update engine's group
async fn set_package_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o660);
        if let Err(e) = tokio::fs::set_permissions(path, permissions).await {
            warn!("Failed to set permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    debug!("Leaving permissions of {} unchanged", path.display());
}

/// Background payload preparation
pub struct PrepareService {
    preparer: Arc<PayloadPreparer>,
    bus: Arc<EventBus>,
    store: Arc<OperationStore>,
    slot: Arc<TaskSlot>,
}

impl PrepareService {
    pub fn new(preparer: PayloadPreparer, bus: Arc<EventBus>, store: Arc<OperationStore>) -> Self {
        Self {
            preparer: Arc::new(preparer),
            bus,
            store,
            slot: TaskSlot::new("payload preparation"),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Start preparing `config` and return the update id
    ///
    /// Fails with [`OrchestratorError::Busy`] while another preparation
    /// runs. The record stays `preparing` on success; the caller moves it on.
    pub fn start(&self, config: UpdateConfig) -> Result<String, OrchestratorError> {
        let runtime =
            Handle::try_current().map_err(|_| OrchestratorError::NoRuntime(self.slot.name()))?;
        let guard = self
            .slot
            .try_acquire()
            .ok_or(OrchestratorError::Busy(self.slot.name()))?;

        let id = self.store.generate_update_id();
        self.store
            .add_update(ActiveUpdate::new(&id, &config.name))?;
        self.store.set_last_update_config(&LastUpdateConfig {
            name: config.name.clone(),
            url: config.url.clone(),
            install_type: config.install_type,
        })?;
        info!("Starting payload preparation {} for {}", id, config.name);

        let preparer = self.preparer.clone();
        let bus = self.bus.clone();
        let store = self.store.clone();
        let task_id = id.clone();

        runtime.spawn(async move {
            let id = task_id;
            bus.publish(&UpdateEvent::PrepareStarted { id: id.clone() });

            let result = preparer
                .prepare(&config, |step| {
                    let pct = step.percent();
                    if let Err(e) = store.update_update_progress(&id, pct) {
                        warn!("Failed to record progress of {}: {}", id, e);
                    }
                    if let Err(e) =
                        store.set_update_progress(&UpdateProgress::new("prepare", pct, step.label()))
                    {
                        warn!("Failed to record overall progress: {}", e);
                    }
                    bus.publish(&UpdateEvent::PrepareProgress { id: id.clone(), pct });
                })
                .await;

            match result {
                Ok(spec) => {
                    info!("Payload ready for {}: {}", id, spec.url());
                    drop(guard);
                    bus.publish(&UpdateEvent::PrepareSucceeded { id, spec });
                }
                Err(e) => {
                    error!("Payload preparation {} failed: {}", id, e);
                    let reason = e.user_message();
                    if let Err(e) =
                        store.update_update_status(&id, UpdateStatus::Error, Some(reason.clone()))
                    {
                        warn!("Failed to record failure of {}: {}", id, e);
                    }
                    drop(guard);
                    bus.publish(&UpdateEvent::PrepareFailed { id, reason });
                }
            }
        });

        Ok(id)
    }
}
