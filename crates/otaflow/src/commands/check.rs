//! Check (and install) command

use anyhow::{anyhow, bail, Context, Result};
use indicatif::ProgressBar;
use otaflow_update::engine::{PackageVerifier, UpdateEngine, UpdateEngineClient, ZipSignatureVerifier};
use otaflow_update::events::{UpdateEvent, UpdateListener};
use otaflow_update::orchestrator::{OrchestratorDeps, OrchestratorState, UpdateOrchestrator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{device_info, load_runtime, open_store, GlobalOptions};
use crate::output;

pub async fn run(install: bool, global: &GlobalOptions) -> Result<()> {
    let runtime = load_runtime(global)?;
    let store = open_store(&runtime)?;

    let removed = store
        .cleanup_stale(runtime.store.stale_after())
        .context("Failed to clean up stale operations")?;
    debug!("Removed {} stale record(s) before checking", removed);

    let device = device_info(&runtime, global);
    output::info(&format!(
        "Device {} running {}",
        device.product_model(),
        device.software_version()
    ));

    let engine: Arc<dyn UpdateEngine> = Arc::new(UpdateEngineClient::new(&runtime.engine));
    let verifier: Arc<dyn PackageVerifier> = Arc::new(ZipSignatureVerifier);
    let deps = OrchestratorDeps::from_runtime(runtime, store, engine, verifier, device)?;
    let orchestrator = UpdateOrchestrator::new(deps);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let forwarder: Arc<dyn UpdateListener> =
        Arc::new(move |event: &UpdateEvent| -> anyhow::Result<()> {
            tx.send(event.clone())
                .map_err(|_| anyhow!("terminal renderer has gone away"))
        });
    orchestrator.bus().subscribe(forwarder.clone());
    orchestrator.start();

    if install {
        orchestrator.on_check_and_install()?;
    } else {
        orchestrator.on_check_status()?;
    }

    let mut renderer = Renderer::default();
    let outcome = loop {
        let Some(event) = rx.recv().await else {
            break Err(anyhow!("Update events stopped unexpectedly"));
        };
        renderer.render(&event);

        match event {
            UpdateEvent::StateChanged {
                to: OrchestratorState::Idle,
                ..
            } => break Ok(()),
            UpdateEvent::StateChanged {
                to: OrchestratorState::AwaitingConfig,
                ..
            } => {
                output::info("Run 'otaflow install' to apply it");
                break Ok(());
            }
            UpdateEvent::OperationError { reason } => break Err(anyhow!(reason)),
            _ => {}
        }
    };
    renderer.clear();

    orchestrator.bus().unsubscribe(&forwarder);
    match orchestrator.shutdown() {
        Ok(true) => {}
        Ok(false) => warn!("Exiting with operations still recorded as active"),
        Err(e) => warn!("Failed to check for active operations: {}", e),
    }

    if let Err(e) = outcome {
        output::error(&e.to_string());
        bail!("Update check failed");
    }
    Ok(())
}

/// Turns update events into terminal output
#[derive(Default)]
struct Renderer {
    bar: Option<ProgressBar>,
}

impl Renderer {
    fn render(&mut self, event: &UpdateEvent) {
        match event {
            UpdateEvent::DownloadStarted { .. } => {
                self.replace(output::percent_bar("Downloading update config"));
            }
            UpdateEvent::DownloadProgress { pct, .. }
            | UpdateEvent::PrepareProgress { pct, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(u64::from(*pct));
                }
            }
            UpdateEvent::DownloadSucceeded { .. } | UpdateEvent::PrepareSucceeded { .. } => {
                self.clear();
            }
            UpdateEvent::DownloadFailed { .. } | UpdateEvent::PrepareFailed { .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon();
                }
            }
            UpdateEvent::PrepareStarted { .. } => {
                self.replace(output::percent_bar("Preparing payload"));
            }
            UpdateEvent::UpdateAvailable {
                config_name,
                version,
            } => {
                self.clear();
                output::success(&format!("Update available: {} ({})", version, config_name));
            }
            UpdateEvent::NoUpdate { current } => {
                output::success(&format!("Already up to date ({})", current));
            }
            UpdateEvent::EngineStatus { status } => {
                let message = format!("Update engine: {}", status);
                match self.bar.as_ref() {
                    Some(bar) => bar.set_message(message),
                    None => self.replace(output::spinner(&message)),
                }
            }
            UpdateEvent::ApplyCompleted { code, success } => {
                self.clear();
                if *success {
                    output::success(&format!("Update applied ({}), reboot to finish", code));
                } else {
                    output::warning(&format!("Update engine reported {}", code));
                }
            }
            UpdateEvent::StateChanged { from, to } => {
                debug!("{} -> {}", from, to);
            }
            UpdateEvent::OperationError { .. } => self.clear(),
        }
    }

    fn replace(&mut self, bar: ProgressBar) {
        self.clear();
        self.bar = Some(bar);
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
