//! Plugin contracts.
//!
//! Every plugin has a name plus `init` and `fini`. Two capabilities are
//! optional and discovered through explicit queries rather than by probing
//! the type: [`Flagger`] for plugins that declare command line flags and
//! [`Runner`] for plugins that own a long-lived task.

use crate::flags::FlagSet;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit registered with the host.
///
/// `init` runs before any plugin starts running and `fini` runs after the
/// run phase has produced its outcome. Both are called at most once per
/// process execution.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique, immutable plugin name. Also the flag prefix and the key of the
    /// plugin's configuration section.
    fn name(&self) -> &str;

    async fn init(&self) -> anyhow::Result<()>;

    async fn fini(&self) -> anyhow::Result<()>;

    /// Returns the flag capability if this plugin declares flags.
    fn as_flagger(&self) -> Option<&dyn Flagger> {
        None
    }

    /// Returns the run capability if this plugin owns a long-lived task.
    fn as_runner(self: Arc<Self>) -> Option<Arc<dyn Runner>> {
        None
    }
}

/// Capability: declare command line flags under the plugin's prefix.
pub trait Flagger: Send + Sync {
    fn set_flags(&self, flags: &mut FlagSet);
}

/// Capability: run until done, failed, or cancelled.
///
/// Cancellation is cooperative. A runner that ignores `shutdown` is abandoned
/// once the grace period after a termination request runs out.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// Which optional capabilities a registered plugin exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    Basic,
    Flags,
    Run,
    FlagsAndRun,
}

impl Capabilities {
    pub fn new(flags: bool, run: bool) -> Self {
        match (flags, run) {
            (false, false) => Capabilities::Basic,
            (true, false) => Capabilities::Flags,
            (false, true) => Capabilities::Run,
            (true, true) => Capabilities::FlagsAndRun,
        }
    }

    pub fn accepts_flags(self) -> bool {
        matches!(self, Capabilities::Flags | Capabilities::FlagsAndRun)
    }

    pub fn runs(self) -> bool {
        matches!(self, Capabilities::Run | Capabilities::FlagsAndRun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_classification() {
        assert_eq!(Capabilities::new(false, false), Capabilities::Basic);
        assert_eq!(Capabilities::new(true, false), Capabilities::Flags);
        assert_eq!(Capabilities::new(false, true), Capabilities::Run);
        assert_eq!(Capabilities::new(true, true), Capabilities::FlagsAndRun);

        assert!(Capabilities::FlagsAndRun.accepts_flags());
        assert!(Capabilities::FlagsAndRun.runs());
        assert!(!Capabilities::Flags.runs());
        assert!(!Capabilities::Run.accepts_flags());
        assert!(!Capabilities::Basic.runs());
    }
}
