//! Single-occupancy slots for background work
//!
//! Each category of background work (config download, payload preparation)
//! owns one [`TaskSlot`]. A second request while the slot is held is
//! rejected rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct TaskSlot {
    name: &'static str,
    busy: AtomicBool,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            busy: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Claim the slot, or `None` when it is already held
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                debug!("Acquired {} slot", self.name);
                SlotGuard { slot: self.clone() }
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Holds a [`TaskSlot`] until dropped
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<TaskSlot>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
        debug!("Released {} slot", self.slot.name);
    }
}
