//! In-process publish/subscribe for update notifications
//!
//! Background work publishes [`UpdateEvent`]s on an [`EventBus`]; any
//! number of [`UpdateListener`]s observe them. Delivery is synchronous, in
//! subscription order, on the publishing task. Listeners that need another
//! thread redispatch themselves.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use crate::engine::{EngineErrorCode, EngineStatus};
use crate::orchestrator::OrchestratorState;
use crate::payload::PayloadSpec;

/// Update lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    /// Config download accepted and running
    DownloadStarted { id: String },

    /// Config download progress (0-100)
    DownloadProgress { id: String, pct: u8 },

    /// Config saved at `local_path`
    DownloadSucceeded { id: String, local_path: PathBuf },

    DownloadFailed { id: String, reason: String },

    PrepareStarted { id: String },

    PrepareProgress { id: String, pct: u8 },

    /// Payload ready for the update engine
    PrepareSucceeded { id: String, spec: PayloadSpec },

    PrepareFailed { id: String, reason: String },

    /// Orchestrator moved between states
    StateChanged {
        from: OrchestratorState,
        to: OrchestratorState,
    },

    /// A newer build than the device's was found
    UpdateAvailable { config_name: String, version: String },

    /// The device already runs the newest build
    NoUpdate { current: String },

    /// Coarse status reported by the update engine
    EngineStatus { status: EngineStatus },

    /// The update engine finished applying the payload
    ApplyCompleted { code: EngineErrorCode, success: bool },

    /// The orchestrator entered its error state
    OperationError { reason: String },
}

impl UpdateEvent {
    /// Event name as serialized in the `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Self::DownloadStarted { .. } => "download_started",
            Self::DownloadProgress { .. } => "download_progress",
            Self::DownloadSucceeded { .. } => "download_succeeded",
            Self::DownloadFailed { .. } => "download_failed",
            Self::PrepareStarted { .. } => "prepare_started",
            Self::PrepareProgress { .. } => "prepare_progress",
            Self::PrepareSucceeded { .. } => "prepare_succeeded",
            Self::PrepareFailed { .. } => "prepare_failed",
            Self::StateChanged { .. } => "state_changed",
            Self::UpdateAvailable { .. } => "update_available",
            Self::NoUpdate { .. } => "no_update",
            Self::EngineStatus { .. } => "engine_status",
            Self::ApplyCompleted { .. } => "apply_completed",
            Self::OperationError { .. } => "operation_error",
        }
    }
}

/// Observer of update events
///
/// Returning an error only affects this listener: it is logged and delivery
/// continues with the next one.
pub trait UpdateListener: Send + Sync {
    fn on_event(&self, event: &UpdateEvent) -> anyhow::Result<()>;
}

impl<F> UpdateListener for F
where
    F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &UpdateEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Fan-out event bus
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn UpdateListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Subscribing the same listener twice has no effect.
    pub fn subscribe(&self, listener: Arc<dyn UpdateListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a listener. Unknown listeners are ignored.
    pub fn unsubscribe(&self, listener: &Arc<dyn UpdateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !same_listener(l, listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every current listener. Returns how many handled
    /// it without error.
    ///
    /// Listeners are snapshotted first, so handlers may subscribe,
    /// unsubscribe or publish without deadlocking.
    pub fn publish(&self, event: &UpdateEvent) -> usize {
        let snapshot: Vec<Arc<dyn UpdateListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!(
            "Publishing {} to {} listener(s)",
            event.name(),
            snapshot.len()
        );

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Listener failed to handle {}: {:#}", event.name(), e),
                Err(_) => error!("Listener panicked while handling {}", event.name()),
            }
        }
        delivered
    }
}

fn same_listener(a: &Arc<dyn UpdateListener>, b: &Arc<dyn UpdateListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn started(id: &str) -> UpdateEvent {
        UpdateEvent::DownloadStarted { id: id.to_string() }
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn UpdateListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let listener: Arc<dyn UpdateListener> = Arc::new(move |_: &UpdateEvent| -> anyhow::Result<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, listener)
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&started("download_1")), 0);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        bus.subscribe(listener.clone());
        bus.subscribe(listener.clone());
        assert_eq!(bus.listener_count(), 1);

        bus.publish(&started("download_1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.unsubscribe(&listener);
        bus.unsubscribe(&listener);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let bus = EventBus::new();
        let failing: Arc<dyn UpdateListener> =
            Arc::new(|_: &UpdateEvent| -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) });
        let (count, listener) = counter();

        bus.subscribe(failing);
        bus.subscribe(listener);

        assert_eq!(bus.publish(&started("download_1")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let panicking: Arc<dyn UpdateListener> =
            Arc::new(|_: &UpdateEvent| -> anyhow::Result<()> { panic!("listener bug") });
        let (count, listener) = counter();

        bus.subscribe(panicking);
        bus.subscribe(listener);

        bus.publish(&started("download_1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            bus.subscribe(Arc::new(move |_: &UpdateEvent| -> anyhow::Result<()> {
                order.lock().unwrap().push(n);
                Ok(())
            }));
        }
        bus.publish(&started("download_1"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself_during_delivery() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<Arc<dyn UpdateListener>>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let bus_ref = Arc::downgrade(&bus);
        let slot_ref = slot.clone();
        let hits_ref = hits.clone();
        let listener: Arc<dyn UpdateListener> = Arc::new(move |_: &UpdateEvent| -> anyhow::Result<()> {
            hits_ref.fetch_add(1, Ordering::SeqCst);
            if let (Some(bus), Some(me)) = (bus_ref.upgrade(), slot_ref.lock().unwrap().clone()) {
                bus.unsubscribe(&me);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(listener.clone());
        bus.subscribe(listener);

        bus.publish(&started("download_1"));
        bus.publish(&started("download_2"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_string(&UpdateEvent::DownloadProgress {
            id: "download_1".into(),
            pct: 40,
        })
        .unwrap();
        assert!(json.contains(r#""type":"download_progress""#));
        assert!(json.contains(r#""pct":40"#));
    }
}
