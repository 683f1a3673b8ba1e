//! Config document download
//!
//! [`ConfigFetcher`] downloads and validates one update config document.
//! [`ConfigDownloadService`] runs fetches in the background, one at a time,
//! recording them in the [`OperationStore`] and reporting on the
//! [`EventBus`].

use otaflow_core::types::UpdateConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::device::{device_config_url, DeviceInfo};
use crate::download::{ByteRange, RangeDownloader};
use crate::error::{FetchError, OrchestratorError};
use crate::events::{EventBus, UpdateEvent};
use crate::store::{ActiveDownload, DownloadStatus, OperationStore};
use crate::tasks::TaskSlot;

const HTML_MARKERS: [&str; 3] = ["<!DOCTYPE", "<html", "<HTML"];

/// Share of the overall check progress taken by the config download
const DOWNLOAD_PROGRESS_SHARE: u32 = 80;

/// Downloads config documents into the configs directory
pub struct ConfigFetcher {
    downloader: RangeDownloader,
    configs_dir: PathBuf,
    file_name: String,
}

impl ConfigFetcher {
    /// `downloader` is capped at `max_size` bytes for config documents
    pub fn new(
        downloader: RangeDownloader,
        max_size: u64,
        configs_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            downloader: downloader.with_max_size(max_size),
            configs_dir: configs_dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn configs_dir(&self) -> &Path {
        &self.configs_dir
    }

    /// Download `url`, check it is a usable config, and save it
    ///
    /// The saved file is only replaced once the new document validated.
    pub async fn fetch<F>(&self, url: &str, mut on_progress: F) -> Result<PathBuf, FetchError>
    where
        F: FnMut(u8) + Send,
    {
        tokio::fs::create_dir_all(&self.configs_dir).await?;

        let partial = tempfile::Builder::new()
            .prefix(".ota_config")
            .suffix(".part")
            .tempfile_in(&self.configs_dir)?;

        let outcome = self
            .downloader
            .download_with_progress(url, ByteRange::whole(), partial.path(), |progress| {
                if let Some(pct) = progress.percent() {
                    on_progress(pct);
                }
            })
            .await?;
        debug!("Fetched {} bytes from {}", outcome.bytes_written, url);

        let content = tokio::fs::read_to_string(partial.path()).await?;
        let content = content.trim();
        if looks_like_html(content) {
            warn!("Config download from {} returned an HTML page", url);
            return Err(FetchError::HtmlContent);
        }
        UpdateConfig::from_json(content)?;

        let destination = self.configs_dir.join(&self.file_name);
        partial
            .persist(&destination)
            .map_err(|e| FetchError::Io(e.error))?;
        info!("Saved update config to {}", destination.display());
        Ok(destination)
    }
}

fn looks_like_html(content: &str) -> bool {
    HTML_MARKERS.iter().any(|marker| content.starts_with(marker))
}

/// Background config downloads
pub struct ConfigDownloadService {
    fetcher: Arc<ConfigFetcher>,
    bus: Arc<EventBus>,
    store: Arc<OperationStore>,
    slot: Arc<TaskSlot>,
    device: Arc<dyn DeviceInfo>,
    insert_model: bool,
}

impl ConfigDownloadService {
    pub fn new(
        fetcher: ConfigFetcher,
        bus: Arc<EventBus>,
        store: Arc<OperationStore>,
        device: Arc<dyn DeviceInfo>,
        insert_model: bool,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            bus,
            store,
            slot: TaskSlot::new("config download"),
            device,
            insert_model,
        }
    }

    pub fn configs_dir(&self) -> &Path {
        self.fetcher.configs_dir()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Start downloading the config at `url` and return the download id
    ///
    /// Fails with [`OrchestratorError::Busy`] while another download runs.
    /// Progress and the outcome arrive as events.
    pub fn start(&self, url: &str) -> Result<String, OrchestratorError> {
        let url = if self.insert_model {
            device_config_url(url, &self.device.product_model())?
        } else {
            url.to_string()
        };

        let runtime =
            Handle::try_current().map_err(|_| OrchestratorError::NoRuntime(self.slot.name()))?;
        let guard = self
            .slot
            .try_acquire()
            .ok_or(OrchestratorError::Busy(self.slot.name()))?;

        let id = self.store.generate_download_id();
        self.store.add_download(ActiveDownload::new(&id, &url))?;
        info!("Starting config download {} from {}", id, url);

        let fetcher = self.fetcher.clone();
        let bus = self.bus.clone();
        let store = self.store.clone();
        let task_id = id.clone();

        runtime.spawn(async move {
            let id = task_id;
            bus.publish(&UpdateEvent::DownloadStarted { id: id.clone() });

            let mut last_pct = None;
            let result = fetcher
                .fetch(&url, |pct| {
                    let scaled = (u32::from(pct) * DOWNLOAD_PROGRESS_SHARE / 100) as u8;
                    if last_pct == Some(scaled) {
                        return;
                    }
                    last_pct = Some(scaled);
                    if let Err(e) = store.update_download_progress(&id, scaled) {
                        warn!("Failed to record progress of {}: {}", id, e);
                    }
                    bus.publish(&UpdateEvent::DownloadProgress {
                        id: id.clone(),
                        pct: scaled,
                    });
                })
                .await;

            match result {
                Ok(local_path) => {
                    if let Err(e) =
                        store.update_download_status(&id, DownloadStatus::Completed, None)
                    {
                        warn!("Failed to record completion of {}: {}", id, e);
                    }
                    drop(guard);
                    bus.publish(&UpdateEvent::DownloadSucceeded { id, local_path });
                }
                Err(e) => {
                    error!("Config download {} failed: {}", id, e);
                    let reason = e.user_message().to_string();
                    if let Err(e) = store.update_download_status(
                        &id,
                        DownloadStatus::Error,
                        Some(reason.clone()),
                    ) {
                        warn!("Failed to record failure of {}: {}", id, e);
                    }
                    drop(guard);
                    bus.publish(&UpdateEvent::DownloadFailed { id, reason });
                }
            }
        });

        Ok(id)
    }
}
