use super::{ComponentState, Lifecycle, LifecyclePhase};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

impl Lifecycle {
    /// Current process-global phase
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions
    pub fn subscribe_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    pub(super) fn set_phase(&self, phase: LifecyclePhase) {
        self.phase.send_replace(phase);
        debug!("Lifecycle phase changed to: {:?}", phase);
    }

    /// Update component state
    pub(super) fn set_component_state(&self, component: &str, state: ComponentState) {
        record_state(&self.component_states, component, state);
    }

    /// Get component state
    pub fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().get(component).cloned()
    }

    /// Get all component states
    pub fn component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().clone()
    }
}

/// Shared with run tasks, which outlive the `&self` borrow.
pub(super) fn record_state(
    states: &Mutex<HashMap<String, ComponentState>>,
    component: &str,
    state: ComponentState,
) {
    debug!("Component '{}' state changed to: {:?}", component, state);
    states.lock().insert(component.to_string(), state);
}
