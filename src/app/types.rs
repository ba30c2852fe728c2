use crate::error::{HostError, Result};
use std::fmt;
use std::time::Duration;

/// Grace period granted to running plugins after a termination request.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Process-global lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Finalized,
    Failed,
}

/// Per-plugin lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Registered,
    Initializing,
    Initialized,
    Running,
    Stopped,
    Finalized,
    Failed,
}

/// Why the run phase was asked to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(signal) => write!(f, "received {signal}"),
            ShutdownReason::Requested(reason) => write!(f, "requested: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub grace_period: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Result of one lifecycle execution.
#[derive(Debug)]
pub struct RunReport {
    /// Init failure, or the first-resolved run outcome.
    pub outcome: Result<()>,
    /// Finalize failures, in finalize order. Never part of `outcome`.
    pub finalize_failures: Vec<HostError>,
    /// Plugins whose run task had not returned when finalization ended.
    pub abandoned: Vec<String>,
}

impl RunReport {
    pub(crate) fn aborted(error: HostError) -> Self {
        Self {
            outcome: Err(error),
            finalize_failures: Vec::new(),
            abandoned: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<()> {
        self.outcome
    }
}
