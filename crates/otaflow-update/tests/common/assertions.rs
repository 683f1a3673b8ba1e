//! Assertion helpers over recorded events

use otaflow_update::events::UpdateEvent;
use otaflow_update::orchestrator::OrchestratorState;

/// States entered, in order
pub fn state_path(events: &[UpdateEvent]) -> Vec<OrchestratorState> {
    events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

/// Assert the orchestrator passed through `expected` in order
pub fn assert_state_path(events: &[UpdateEvent], expected: &[OrchestratorState]) {
    assert_eq!(
        state_path(events),
        expected,
        "Unexpected state transitions. Events: {:#?}",
        events
    );
}

/// Assert that no event of the given kind was published
pub fn assert_no_event(events: &[UpdateEvent], name: &str) {
    assert!(
        events.iter().all(|e| e.name() != name),
        "Expected no '{}' event, got: {:#?}",
        name,
        events
    );
}

/// Progress values reported by prepare events, in order
pub fn prepare_progress(events: &[UpdateEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::PrepareProgress { pct, .. } => Some(*pct),
            _ => None,
        })
        .collect()
}

/// Assert a sequence never decreases
pub fn assert_non_decreasing(values: &[u8]) {
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "Progress went backwards: {:?}",
        values
    );
}
