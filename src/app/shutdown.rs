use super::runtime::catch_panic;
use super::{ComponentState, Lifecycle, ShutdownReason};
use crate::error::{HostError, Result};
use crate::registry::Component;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Single-resolution slot for the run outcome.
///
/// Any number of writers may offer; the first one wins and later offers are
/// dropped without blocking.
#[derive(Clone)]
pub(super) struct OutcomeSlot {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>,
}

impl OutcomeSlot {
    pub(super) fn new() -> (Self, oneshot::Receiver<Result<()>>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        };
        (slot, receiver)
    }

    /// Returns whether this offer became the outcome.
    pub(super) fn offer(&self, outcome: Result<()>) -> bool {
        let sender = self.sender.lock().take();
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => {
                if let Err(e) = outcome {
                    debug!("Run outcome already decided, discarding: {}", e);
                }
                false
            }
        }
    }
}

/// Turns a termination request into cancellation plus a bounded wait.
pub(super) struct ShutdownCoordinator {
    shutdown: CancellationToken,
    slot: OutcomeSlot,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub(super) fn new(
        shutdown: CancellationToken,
        slot: OutcomeSlot,
        grace_period: Duration,
    ) -> Self {
        Self {
            shutdown,
            slot,
            grace_period,
        }
    }

    /// Spawns the listener. The handle must be aborted once the outcome is
    /// known.
    pub(super) fn arm<F>(self, termination: F) -> JoinHandle<()>
    where
        F: Future<Output = ShutdownReason> + Send + 'static,
    {
        tokio::spawn(
            async move {
                let reason = termination.await;
                info!(
                    "Shutdown initiated ({}), waiting up to {:?} for plugins",
                    reason, self.grace_period
                );
                self.shutdown.cancel();

                tokio::time::sleep(self.grace_period).await;

                let forced = HostError::ForcedExit {
                    grace_period: self.grace_period,
                };
                if self.slot.offer(Err(forced)) {
                    error!("Plugins did not stop within {:?}, forcing exit", self.grace_period);
                }
            }
            .in_current_span(),
        )
    }
}

/// The run phase's task group.
///
/// Tracks which plugins have not returned yet so the ones left behind after
/// finalization can be named before they are aborted.
pub(super) struct RunTasks {
    set: JoinSet<()>,
    running: Arc<Mutex<BTreeSet<String>>>,
}

/// Removes its plugin from the running set when dropped.
pub(super) struct Running {
    name: String,
    running: Arc<Mutex<BTreeSet<String>>>,
}

impl Running {
    pub(super) fn finish(self) {}
}

impl Drop for Running {
    fn drop(&mut self) {
        self.running.lock().remove(&self.name);
    }
}

impl RunTasks {
    pub(super) fn new() -> Self {
        Self {
            set: JoinSet::new(),
            running: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub(super) fn track(&self, name: &str) -> Running {
        self.running.lock().insert(name.to_string());
        Running {
            name: name.to_string(),
            running: Arc::clone(&self.running),
        }
    }

    pub(super) fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.set.spawn(task);
    }

    pub(super) fn len(&self) -> usize {
        self.set.len()
    }

    pub(super) async fn join_next(&mut self) -> Option<std::result::Result<(), JoinError>> {
        self.set.join_next().await
    }

    /// Aborts whatever is still running and returns those plugin names.
    pub(super) fn abandon(mut self) -> Vec<String> {
        let abandoned: Vec<String> = self.running.lock().iter().cloned().collect();
        if !abandoned.is_empty() {
            warn!("Abandoning run tasks that did not return: {:?}", abandoned);
        }
        self.set.abort_all();
        abandoned
    }
}

impl Lifecycle {
    /// Finalize every component in reverse registration order.
    ///
    /// A failure is logged and recorded, and the remaining components are
    /// still finalized. Each component gets exactly one attempt.
    pub(super) async fn finalize(&self, components: &[Component]) -> Vec<HostError> {
        info!("Finalizing {} plugins", components.len());

        let mut failures = Vec::new();
        for component in components.iter().rev() {
            let name = component.name();
            match catch_panic(component.plugin().fini()).await {
                Ok(()) => {
                    self.set_component_state(name, ComponentState::Finalized);
                    debug!(plugin = %name, "fini success");
                }
                Err(e) => {
                    self.set_component_state(name, ComponentState::Failed);
                    error!(plugin = %name, error = %format!("{e:#}"), "fini");
                    failures.push(HostError::finalize(name, e));
                }
            }
        }

        if failures.is_empty() {
            info!("All plugins finalized");
        } else {
            warn!("{} plugins failed to finalize", failures.len());
        }
        failures
    }
}
