use super::runtime::catch_panic;
use super::{ComponentState, Lifecycle};
use crate::error::{HostError, Result};
use crate::registry::Component;
use tracing::{debug, error, info};

impl Lifecycle {
    /// Initialize components one at a time, in registration order.
    ///
    /// Stops at the first failure. Components initialized before it are not
    /// finalized: a process that failed to start does not run and does not
    /// clean up at this layer.
    pub(super) async fn initialize(&self, components: &[Component]) -> Result<()> {
        info!("Initializing {} plugins", components.len());

        for component in components {
            self.set_component_state(component.name(), ComponentState::Registered);
        }

        for component in components {
            let name = component.name();
            self.set_component_state(name, ComponentState::Initializing);

            if let Err(e) = catch_panic(component.plugin().init()).await {
                self.set_component_state(name, ComponentState::Failed);
                error!(plugin = %name, error = %format!("{e:#}"), "init");
                return Err(HostError::init(name, e));
            }

            self.set_component_state(name, ComponentState::Initialized);
            debug!(plugin = %name, "init success");
        }

        info!("All plugins initialized successfully");
        Ok(())
    }
}
