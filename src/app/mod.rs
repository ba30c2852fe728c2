//! Plugin lifecycle driver.
//!
//! ```text
//! init  (registration order, sequential, fail fast)
//!   → run   (one task per runnable plugin, first outcome wins)
//!   → fini  (reverse registration order, sequential, best effort)
//! ```
//!
//! A termination request cancels every run task and starts the grace
//! period; if it runs out before the run phase resolves, the outcome is a
//! forced exit.

mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::Lifecycle;
pub use runtime::termination_signal;
pub use types::{
    ComponentState, LifecycleOptions, LifecyclePhase, RunReport, ShutdownReason,
    DEFAULT_GRACE_PERIOD,
};
