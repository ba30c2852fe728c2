use super::types::{ComponentState, LifecycleOptions, LifecyclePhase};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Drives registered plugins through init, run and fini.
///
/// A `Lifecycle` carries one process execution: once it has run it reports
/// an error instead of running again.
pub struct Lifecycle {
    pub(super) options: LifecycleOptions,
    pub(super) phase: watch::Sender<LifecyclePhase>,
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
}

impl Lifecycle {
    /// Create a new lifecycle with the given options
    pub fn new(options: LifecycleOptions) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Uninitialized);
        Self {
            options,
            phase,
            component_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.options.grace_period
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(LifecycleOptions::default())
    }
}
