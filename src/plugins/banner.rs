use crate::config::Slot;
use crate::flags::{Flag, FlagSet};
use crate::plugin::{Flagger, Plugin};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannerConfig {
    pub environment: String,
    pub node: String,
    pub addr: String,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            node: "node0".to_string(),
            addr: "localhost:8000".to_string(),
        }
    }
}

/// Announces which node this process is and where it lives.
#[derive(Debug, Default)]
pub struct Banner {
    config: Slot<BannerConfig>,
    development: Flag<bool>,
    announced: Mutex<Option<String>>,
}

impl Banner {
    pub fn new(config: BannerConfig) -> Self {
        Self {
            config: Slot::new(config),
            ..Default::default()
        }
    }

    /// Configuration slot to register alongside the plugin.
    pub fn config(&self) -> Slot<BannerConfig> {
        self.config.clone()
    }

    /// Line announced during `init`, cleared again by `fini`.
    pub fn announced(&self) -> Option<String> {
        self.announced.lock().clone()
    }

    fn compose(&self) -> String {
        let config = self.config.read();
        let mut line = format!("{} ({}) at {}", config.node, config.environment, config.addr);
        if self.development.get() {
            line.push_str(" [development]");
        }
        line
    }
}

#[async_trait]
impl Plugin for Banner {
    fn name(&self) -> &str {
        "banner"
    }

    async fn init(&self) -> anyhow::Result<()> {
        let line = self.compose();
        info!("{}", line);
        *self.announced.lock() = Some(line);
        Ok(())
    }

    async fn fini(&self) -> anyhow::Result<()> {
        if let Some(line) = self.announced.lock().take() {
            info!("Leaving {}", line);
        }
        Ok(())
    }

    fn as_flagger(&self) -> Option<&dyn Flagger> {
        Some(self)
    }
}

impl Flagger for Banner {
    fn set_flags(&self, flags: &mut FlagSet) {
        flags.bool_var(
            &self.development,
            "development",
            false,
            "mark this node as a development node",
        );
    }
}
