//! Update orchestration state machine
//!
//! [`UpdateOrchestrator`] drives one update attempt end to end: config
//! download, the incremental/full fallback decision, payload preparation
//! and application through the update engine. It reacts to the events its
//! background services publish on the [`EventBus`] and reports its own
//! progress there too.
//!
//! ```text
//! Idle/AwaitingConfig/Error --check--> CheckingStatus
//! CheckingStatus --newer, wait--> AwaitingConfig --install--> Preparing
//! CheckingStatus --newer, install--> Preparing --ready--> Applying --done--> Idle
//! CheckingStatus --not newer--> Idle
//! any failure --> Error
//! ```

use otaflow_core::{
    compare_versions, config_names, load_update_configs, RuntimeConfig, UpdateConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config_fetch::{ConfigDownloadService, ConfigFetcher};
use crate::device::DeviceInfo;
use crate::download::RangeDownloader;
use crate::engine::{
    engine_properties, EngineErrorCode, EngineUpdate, PackageVerifier, UpdateEngine,
};
use crate::error::OrchestratorError;
use crate::events::{EventBus, UpdateEvent, UpdateListener};
use crate::payload::PayloadSpec;
use crate::prepare::{PayloadPreparer, PrepareService};
use crate::store::{OperationStore, UpdateStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    CheckingStatus,
    AwaitingConfig,
    Preparing,
    Applying,
    Error,
}

impl OrchestratorState {
    /// States from which a new check may start
    pub fn can_check(self) -> bool {
        matches!(self, Self::Idle | Self::AwaitingConfig | Self::Error)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::CheckingStatus => "checking status",
            Self::AwaitingConfig => "awaiting config",
            Self::Preparing => "preparing",
            Self::Applying => "applying",
            Self::Error => "error",
        })
    }
}

/// Collaborators of the orchestrator
pub struct OrchestratorDeps {
    pub bus: Arc<EventBus>,
    pub store: Arc<OperationStore>,
    pub config_downloads: Arc<ConfigDownloadService>,
    pub preparer: Arc<PrepareService>,
    pub engine: Arc<dyn UpdateEngine>,
    pub device: Arc<dyn DeviceInfo>,
    pub runtime: RuntimeConfig,
}

impl OrchestratorDeps {
    /// Wire the default services for `runtime` around the given capabilities
    pub fn from_runtime(
        runtime: RuntimeConfig,
        store: Arc<OperationStore>,
        engine: Arc<dyn UpdateEngine>,
        verifier: Arc<dyn PackageVerifier>,
        device: Arc<dyn DeviceInfo>,
    ) -> anyhow::Result<Self> {
        let bus = Arc::new(EventBus::new());
        let downloader = RangeDownloader::new(&runtime.network)?;

        let fetcher = ConfigFetcher::new(
            downloader.clone(),
            runtime.network.max_config_size,
            runtime.paths.configs_dir()?,
            runtime.paths.config_file_name.clone(),
        );
        let config_downloads = Arc::new(ConfigDownloadService::new(
            fetcher,
            bus.clone(),
            store.clone(),
            device.clone(),
            runtime.sources.insert_product_model,
        ));

        let preparer = Arc::new(PrepareService::new(
            PayloadPreparer::new(
                downloader,
                engine.clone(),
                verifier,
                runtime.paths.ota_package_dir.clone(),
            ),
            bus.clone(),
            store.clone(),
        ));

        Ok(Self {
            bus,
            store,
            config_downloads,
            preparer,
            engine,
            device,
            runtime,
        })
    }
}

#[derive(Debug)]
struct Flow {
    state: OrchestratorState,
    apply_requested: bool,
    is_incremental: bool,
    has_tried_full: bool,
    is_new_version: bool,
    selected: Option<UpdateConfig>,
    last_error: Option<String>,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            state: OrchestratorState::Idle,
            apply_requested: false,
            is_incremental: true,
            has_tried_full: false,
            is_new_version: false,
            selected: None,
            last_error: None,
        }
    }
}

struct Inner {
    deps: OrchestratorDeps,
    flow: Mutex<Flow>,
}

/// Top-level update coordinator
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
    listener: Arc<dyn UpdateListener>,
}

impl UpdateOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let inner = Arc::new(Inner {
            deps,
            flow: Mutex::new(Flow::default()),
        });
        let listener: Arc<dyn UpdateListener> = Arc::new(OrchestratorListener {
            inner: Arc::downgrade(&inner),
        });
        Self { inner, listener }
    }

    /// Subscribe to the event bus. Triggers have no effect on the flow
    /// until this is called.
    pub fn start(&self) {
        self.inner.deps.bus.subscribe(self.listener.clone());
    }

    /// Unsubscribe from the event bus unless an operation recorded as
    /// active could still deliver results. Returns whether it unsubscribed.
    pub fn shutdown(&self) -> Result<bool, OrchestratorError> {
        if self.inner.deps.store.has_active_operations()? {
            info!("Keeping orchestrator subscribed: operations still active");
            return Ok(false);
        }
        self.inner.deps.bus.unsubscribe(&self.listener);
        Ok(true)
    }

    /// Check for a newer build, starting with the incremental config.
    /// Returns the config download id.
    pub fn on_check_status(&self) -> Result<String, OrchestratorError> {
        self.inner.begin_check(false)
    }

    /// Check for a newer build and install it as soon as it is found
    pub fn on_check_and_install(&self) -> Result<String, OrchestratorError> {
        self.inner.begin_check(true)
    }

    /// Install the config found by the last check. Returns the update id.
    pub fn on_update(&self) -> Result<String, OrchestratorError> {
        let config = {
            let flow = self.inner.flow();
            if flow.state != OrchestratorState::AwaitingConfig {
                return Err(OrchestratorError::InvalidTransition {
                    action: "install",
                    state: flow.state.to_string(),
                });
            }
            flow.selected
                .clone()
                .ok_or(OrchestratorError::NoConfigSelected)?
        };
        self.inner
            .begin_prepare(config)
            .inspect_err(|e| self.inner.fail(e.user_message()))
    }

    pub fn state(&self) -> OrchestratorState {
        self.inner.flow().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.flow().last_error.clone()
    }

    pub fn selected_config(&self) -> Option<UpdateConfig> {
        self.inner.flow().selected.clone()
    }

    pub fn is_new_version(&self) -> bool {
        self.inner.flow().is_new_version
    }

    /// False once the check fell back to the full config
    pub fn is_incremental(&self) -> bool {
        self.inner.flow().is_incremental
    }

    pub fn has_active_operations(&self) -> Result<bool, OrchestratorError> {
        Ok(self.inner.deps.store.has_active_operations()?)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.deps.bus
    }

    pub fn store(&self) -> &Arc<OperationStore> {
        &self.inner.deps.store
    }
}

struct OrchestratorListener {
    inner: Weak<Inner>,
}

impl UpdateListener for OrchestratorListener {
    fn on_event(&self, event: &UpdateEvent) -> anyhow::Result<()> {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle(event);
        }
        Ok(())
    }
}

impl Inner {
    fn flow(&self) -> MutexGuard<'_, Flow> {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: UpdateEvent) {
        self.deps.bus.publish(&event);
    }

    fn announce(&self, from: OrchestratorState, to: OrchestratorState) {
        if from != to {
            debug!("Orchestrator {} -> {}", from, to);
            self.publish(UpdateEvent::StateChanged { from, to });
        }
    }

    fn enter(&self, to: OrchestratorState) {
        let from = std::mem::replace(&mut self.flow().state, to);
        self.announce(from, to);
    }

    fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Update failed: {}", reason);
        let from = {
            let mut flow = self.flow();
            flow.last_error = Some(reason.clone());
            std::mem::replace(&mut flow.state, OrchestratorState::Error)
        };
        self.announce(from, OrchestratorState::Error);
        self.publish(UpdateEvent::OperationError { reason });
    }

    fn begin_check(&self, apply: bool) -> Result<String, OrchestratorError> {
        let from = {
            let mut flow = self.flow();
            if !flow.state.can_check() {
                return Err(OrchestratorError::InvalidTransition {
                    action: "check for updates",
                    state: flow.state.to_string(),
                });
            }
            let from = flow.state;
            *flow = Flow {
                state: OrchestratorState::CheckingStatus,
                apply_requested: apply,
                ..Flow::default()
            };
            from
        };
        self.announce(from, OrchestratorState::CheckingStatus);

        let url = &self.deps.runtime.sources.incremental_config_url;
        info!("Checking for updates (incremental config {})", url);
        self.deps
            .config_downloads
            .start(url)
            .inspect_err(|e| self.fail(e.user_message()))
    }

    fn begin_prepare(&self, config: UpdateConfig) -> Result<String, OrchestratorError> {
        {
            let mut flow = self.flow();
            flow.apply_requested = false;
            flow.has_tried_full = false;
        }
        self.enter(OrchestratorState::Preparing);
        info!("Preparing update {}", config.name);
        self.deps.preparer.start(config)
    }

    fn handle(self: &Arc<Self>, event: &UpdateEvent) {
        let state = self.flow().state;
        match (event, state) {
            (UpdateEvent::DownloadSucceeded { local_path, .. }, OrchestratorState::CheckingStatus) => {
                if let Err(e) = self.on_config_downloaded(local_path) {
                    error!("Failed to evaluate downloaded config: {}", e);
                    self.fail(e.user_message());
                }
            }
            (UpdateEvent::DownloadFailed { reason, .. }, OrchestratorState::CheckingStatus) => {
                if let Err(e) = self.deps.store.remove_all_downloads() {
                    warn!("Failed to clear download records: {}", e);
                }
                self.fail(reason.clone());
            }
            (UpdateEvent::PrepareSucceeded { id, spec }, OrchestratorState::Preparing) => {
                self.begin_apply(id.clone(), spec);
            }
            (UpdateEvent::PrepareFailed { id, reason }, OrchestratorState::Preparing) => {
                if let Err(e) = self.deps.store.remove_update(id) {
                    warn!("Failed to remove update record {}: {}", id, e);
                }
                self.fail(reason.clone());
            }
            _ => {}
        }
    }

    /// Fallback decision for a freshly downloaded config
    fn on_config_downloaded(&self, local_path: &Path) -> Result<(), OrchestratorError> {
        self.deps.store.remove_all_downloads()?;

        let known = load_update_configs(self.deps.config_downloads.configs_dir())?;
        debug!("Configs on disk: {:?}", config_names(&known));

        let content = std::fs::read_to_string(local_path).map_err(otaflow_core::Error::from)?;
        let config = UpdateConfig::from_json(&content)?;
        let device_version = self.deps.device.software_version();
        let version = config.version_token()?.to_string();
        let result = compare_versions(&version, &device_version)?;
        info!(
            "Config {} offers {} (device runs {}, difference {})",
            config.name, version, device_version, result
        );

        let mut flow = self.flow();
        if result >= 1 && config.is_incremental() && !flow.has_tried_full {
            flow.is_incremental = false;
            flow.has_tried_full = true;
            drop(flow);

            let url = self.deps.runtime.sources.full_config_url.clone();
            info!("Incremental package not applicable, trying full config {}", url);
            self.deps.config_downloads.start(&url)?;
            return Ok(());
        }

        if result <= 0 {
            flow.is_new_version = false;
            flow.selected = None;
            drop(flow);

            self.publish(UpdateEvent::NoUpdate {
                current: device_version,
            });
            self.enter(OrchestratorState::Idle);
            return Ok(());
        }

        flow.is_new_version = true;
        flow.selected = Some(config.clone());
        let install_now = flow.apply_requested || flow.has_tried_full;
        drop(flow);

        self.publish(UpdateEvent::UpdateAvailable {
            config_name: config.name.clone(),
            version,
        });

        if install_now {
            self.begin_prepare(config)?;
        } else {
            self.enter(OrchestratorState::AwaitingConfig);
        }
        Ok(())
    }

    fn begin_apply(self: &Arc<Self>, update_id: String, spec: &PayloadSpec) {
        if let Err(e) = self
            .deps
            .store
            .update_update_status(&update_id, UpdateStatus::Applying, None)
        {
            warn!("Failed to mark {} as applying: {}", update_id, e);
        }
        self.enter(OrchestratorState::Applying);

        let spec = spec.with_extra_properties(&engine_properties(&self.deps.runtime.engine));
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.finish_update(&update_id, UpdateStatus::Error);
                self.fail(OrchestratorError::NoRuntime("update engine").to_string());
                return;
            }
        };

        let inner = self.clone();
        runtime.spawn(async move {
            inner.run_apply(update_id, spec).await;
        });
    }

    async fn run_apply(&self, update_id: String, spec: PayloadSpec) {
        let mut updates = match self.deps.engine.apply_payload(&spec, &update_id).await {
            Ok(updates) => updates,
            Err(e) => {
                error!("Update engine refused {}: {}", update_id, e);
                self.finish_update(&update_id, UpdateStatus::Error);
                self.fail(format!("Failed to apply update: {}", e));
                return;
            }
        };

        let mut code = None;
        while let Some(update) = updates.recv().await {
            match update {
                EngineUpdate::Status(status) => {
                    debug!("Engine status {}", status);
                    self.publish(UpdateEvent::EngineStatus { status });
                }
                EngineUpdate::Completed(completed) => {
                    code = Some(completed);
                    break;
                }
            }
        }

        let code = code.unwrap_or_else(|| {
            warn!("Update engine stream ended without a completion code");
            EngineErrorCode::ERROR
        });
        let success = code.is_success();
        info!("Update engine finished {} with {}", update_id, code);

        let status = if success {
            UpdateStatus::Completed
        } else {
            UpdateStatus::Error
        };
        self.finish_update(&update_id, status);
        self.publish(UpdateEvent::ApplyCompleted { code, success });

        if success {
            self.enter(OrchestratorState::Idle);
        } else {
            self.fail(format!("Update failed: {}", code));
        }
    }

    fn finish_update(&self, update_id: &str, status: UpdateStatus) {
        let store = &self.deps.store;
        if let Err(e) = store.update_update_status(update_id, status, None) {
            warn!("Failed to record outcome of {}: {}", update_id, e);
        }
        if let Err(e) = store.remove_update(update_id) {
            warn!("Failed to remove update record {}: {}", update_id, e);
        }
    }
}
