//! Ordered set of registered plugins and their configuration slots.
//!
//! Registration happens during single-threaded setup, before the lifecycle
//! starts, so the registry needs no locking. Once the lifecycle runs it is
//! only ever read.

use crate::config::{ConfigSlot, Configurations};
use crate::plugin::{Capabilities, Flagger, Plugin, Runner};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A registered plugin together with its classified capabilities.
pub struct Component {
    name: String,
    plugin: Arc<dyn Plugin>,
    runner: Option<Arc<dyn Runner>>,
    capabilities: Capabilities,
}

impl Component {
    fn new(plugin: Arc<dyn Plugin>) -> Self {
        let name = plugin.name().to_string();
        let runner = Arc::clone(&plugin).as_runner();
        let capabilities = Capabilities::new(plugin.as_flagger().is_some(), runner.is_some());

        Self {
            name,
            plugin,
            runner,
            capabilities,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn flagger(&self) -> Option<&dyn Flagger> {
        if self.capabilities.accepts_flags() {
            self.plugin.as_flagger()
        } else {
            None
        }
    }

    pub fn runner(&self) -> Option<&Arc<dyn Runner>> {
        self.runner.as_ref()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Plugin registry.
#[derive(Default)]
pub struct Registry {
    components: Vec<Component>,
    configs: Configurations,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin and, when given, binds its configuration slot.
    ///
    /// # Panics
    ///
    /// Panics if a plugin with the same name is already registered. That is
    /// a wiring defect in the program, not a runtime condition.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>, config: Option<Arc<dyn ConfigSlot>>) {
        let component = Component::new(plugin);
        if self.contains(component.name()) {
            panic!("{:?} plugin is registered", component.name());
        }

        debug!(
            plugin = %component.name(),
            capabilities = ?component.capabilities(),
            "plugin registered"
        );

        if let Some(config) = config {
            self.configs.insert(component.name().to_string(), config);
        }
        self.components.push(component);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.iter().any(|c| c.name() == name)
    }

    /// Registered components in registration order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn configurations(&self) -> &Configurations {
        &self.configs
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.components)
            .field("configs", &self.configs.keys().collect::<Vec<_>>())
            .finish()
    }
}
