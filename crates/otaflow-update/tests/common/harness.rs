//! A fully wired orchestrator rooted in a temp directory

use otaflow_core::RuntimeConfig;
use otaflow_update::device::StaticDevice;
use otaflow_update::engine::{PackageVerifier, UpdateEngine};
use otaflow_update::events::{EventBus, UpdateListener};
use otaflow_update::orchestrator::{OrchestratorDeps, UpdateOrchestrator};
use otaflow_update::store::OperationStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use super::constants::*;
use super::fakes::*;

/// Runtime config pointing every location into `root` and both config
/// URLs at `server_uri`
pub fn test_runtime(root: &std::path::Path, server_uri: &str) -> RuntimeConfig {
    let mut runtime = RuntimeConfig::default();
    runtime.sources.incremental_config_url =
        format!("{}/update/incremental/ota_config.json", server_uri);
    runtime.sources.full_config_url = format!("{}/update/full/ota_config.json", server_uri);
    runtime.sources.insert_product_model = true;
    runtime.paths.configs_dir = Some(root.join("configs"));
    runtime.paths.ota_package_dir = root.join("ota_package");
    runtime.paths.state_file = Some(root.join("state.json"));
    runtime.network.progress_interval_ms = 0;
    runtime.network.connect_timeout_secs = 2;
    runtime.network.read_timeout_secs = 5;
    runtime
}

pub struct Harness {
    pub temp: TempDir,
    pub engine: Arc<FakeEngine>,
    pub verifier: Arc<FakeVerifier>,
    pub recorder: Arc<EventRecorder>,
    pub orchestrator: UpdateOrchestrator,
}

impl Harness {
    pub fn new(server_uri: &str, device_version: &str) -> Self {
        Self::with_engine(server_uri, device_version, FakeEngine::succeeding())
    }

    pub fn with_engine(server_uri: &str, device_version: &str, engine: Arc<FakeEngine>) -> Self {
        Self::with_options(server_uri, device_version, engine, |_| {})
    }

    /// Harness whose runtime config is adjusted by `configure` before wiring
    pub fn with_options(
        server_uri: &str,
        device_version: &str,
        engine: Arc<FakeEngine>,
        configure: impl FnOnce(&mut RuntimeConfig),
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let mut runtime = test_runtime(temp.path(), server_uri);
        configure(&mut runtime);
        let store = Arc::new(OperationStore::open(temp.path().join("state.json")));
        let verifier = FakeVerifier::new(Verdict::Compatible);

        let deps = OrchestratorDeps::from_runtime(
            runtime,
            store,
            engine.clone() as Arc<dyn UpdateEngine>,
            verifier.clone() as Arc<dyn PackageVerifier>,
            Arc::new(StaticDevice::new(device_version, PRODUCT_MODEL)),
        )
        .unwrap();

        let orchestrator = UpdateOrchestrator::new(deps);
        let recorder = EventRecorder::new();
        orchestrator
            .bus()
            .subscribe(recorder.clone() as Arc<dyn UpdateListener>);
        orchestrator.start();

        Self {
            temp,
            engine,
            verifier,
            recorder,
            orchestrator,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.orchestrator.bus()
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.temp.path().join("configs")
    }

    pub fn package_dir(&self) -> PathBuf {
        self.temp.path().join("ota_package")
    }

    /// Write `bytes` as a local package and return its file URL
    pub fn local_package(&self, bytes: &[u8]) -> String {
        let path = self.temp.path().join("foo.zip");
        std::fs::write(&path, bytes).unwrap();
        url::Url::from_file_path(&path).unwrap().to_string()
    }
}
