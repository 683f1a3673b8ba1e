//! In-process stand-ins for the external capabilities

use async_trait::async_trait;
use otaflow_update::engine::{
    EngineErrorCode, EngineStatus, EngineUpdate, PackageVerifier, UpdateEngine,
};
use otaflow_update::error::{EngineError, VerifyError};
use otaflow_update::events::{UpdateEvent, UpdateListener};
use otaflow_update::orchestrator::OrchestratorState;
use otaflow_update::payload::PayloadSpec;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How long helpers wait for asynchronous events
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Update engine that records what it was asked to do
pub struct FakeEngine {
    metadata_verdict: Result<bool, String>,
    completion: EngineErrorCode,
    verify_calls: AtomicUsize,
    applied: Mutex<Vec<PayloadSpec>>,
}

impl FakeEngine {
    /// Accepts metadata and completes with success
    pub fn succeeding() -> Arc<Self> {
        Self::with(Ok(true), EngineErrorCode::SUCCESS)
    }

    pub fn with(metadata_verdict: Result<bool, String>, completion: EngineErrorCode) -> Arc<Self> {
        Arc::new(Self {
            metadata_verdict,
            completion,
            verify_calls: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting_metadata() -> Arc<Self> {
        Self::with(Ok(false), EngineErrorCode::SUCCESS)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<PayloadSpec> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateEngine for FakeEngine {
    async fn verify_payload_metadata(&self, _metadata: &Path) -> Result<bool, EngineError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.metadata_verdict
            .clone()
            .map_err(EngineError::Rejected)
    }

    async fn apply_payload(
        &self,
        spec: &PayloadSpec,
        _handle: &str,
    ) -> Result<mpsc::Receiver<EngineUpdate>, EngineError> {
        self.applied.lock().unwrap().push(spec.clone());

        let (tx, rx) = mpsc::channel(8);
        for update in [
            EngineUpdate::Status(EngineStatus::Downloading),
            EngineUpdate::Status(EngineStatus::Finalizing),
            EngineUpdate::Completed(self.completion),
        ] {
            tx.try_send(update).expect("channel has room");
        }
        Ok(rx)
    }
}

/// Possible verifier answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Compatible,
    Incompatible,
    IoFailure,
    SecurityFailure,
}

pub struct FakeVerifier {
    verdict: Verdict,
    calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageVerifier for FakeVerifier {
    async fn verify_package(&self, _package: &Path) -> Result<bool, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.verdict {
            Verdict::Compatible => Ok(true),
            Verdict::Incompatible => Ok(false),
            Verdict::IoFailure => Err(VerifyError::Io(std::io::Error::other("disk gone"))),
            Verdict::SecurityFailure => Err(VerifyError::Security("trust store missing".into())),
        }
    }
}

/// Listener that keeps every event it sees
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<UpdateEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&UpdateEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Wait until an event matching `predicate` has been recorded
    pub async fn wait_for(&self, predicate: impl Fn(&UpdateEvent) -> bool) -> UpdateEvent {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            if let Some(event) = self.events().into_iter().find(|e| predicate(e)) {
                return event;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for event. Recorded: {:#?}",
                self.events()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the orchestrator announced entering `state`
    pub async fn wait_for_state(&self, state: OrchestratorState) {
        self.wait_for(|e| matches!(e, UpdateEvent::StateChanged { to, .. } if *to == state))
            .await;
    }
}

impl UpdateListener for EventRecorder {
    fn on_event(&self, event: &UpdateEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
