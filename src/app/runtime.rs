use super::shutdown::{OutcomeSlot, RunTasks, ShutdownCoordinator};
use super::state::record_state;
use super::{ComponentState, Lifecycle, LifecyclePhase, RunReport, ShutdownReason};
use crate::error::{HostError, Result};
use crate::registry::{Component, Registry};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

impl Lifecycle {
    /// Run every registered plugin until done, failed, or interrupted by
    /// SIGINT/SIGTERM.
    pub async fn run(&self, registry: &Registry) -> RunReport {
        self.run_until(registry, termination_signal()).await
    }

    /// Run every registered plugin; `termination` resolving counts as the
    /// external termination request.
    pub async fn run_until<F>(&self, registry: &Registry, termination: F) -> RunReport
    where
        F: Future<Output = ShutdownReason> + Send + 'static,
    {
        let span = info_span!("lifecycle", run_id = %Uuid::new_v4());
        self.execute(registry, termination).instrument(span).await
    }

    async fn execute<F>(&self, registry: &Registry, termination: F) -> RunReport
    where
        F: Future<Output = ShutdownReason> + Send + 'static,
    {
        if self.phase() != LifecyclePhase::Uninitialized {
            return RunReport::aborted(HostError::system("lifecycle has already been started"));
        }

        let components = registry.components();

        self.set_phase(LifecyclePhase::Initializing);
        if let Err(e) = self.initialize(components).await {
            self.set_phase(LifecyclePhase::Failed);
            return RunReport::aborted(e);
        }

        self.set_phase(LifecyclePhase::Running);
        let (outcome, tasks) = self.run_components(components, termination).await;

        let finalize_failures = self.finalize(components).await;
        let abandoned = tasks.abandon();
        self.set_phase(LifecyclePhase::Finalized);

        match &outcome {
            Ok(()) => info!("All plugins finished"),
            Err(e) => error!(error = %e, "Plugins stopped with failure"),
        }

        RunReport {
            outcome,
            finalize_failures,
            abandoned,
        }
    }

    /// Start one task per runnable component and wait for the first outcome.
    ///
    /// Returns as soon as the outcome is known; tasks still unwinding are
    /// handed back so the caller decides when to abandon them.
    async fn run_components<F>(
        &self,
        components: &[Component],
        termination: F,
    ) -> (Result<()>, RunTasks)
    where
        F: Future<Output = ShutdownReason> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let (slot, mut outcome_rx) = OutcomeSlot::new();

        // Armed before any run task exists so no request is missed
        let watcher = ShutdownCoordinator::new(
            shutdown.clone(),
            slot.clone(),
            self.options.grace_period,
        )
        .arm(termination);
        tokio::task::yield_now().await;

        let mut tasks = RunTasks::new();
        for component in components {
            let Some(runner) = component.runner() else {
                continue;
            };

            let name = component.name().to_string();
            let runner = Arc::clone(runner);
            let shutdown = shutdown.clone();
            let slot = slot.clone();
            let states = Arc::clone(&self.component_states);
            let running = tasks.track(&name);

            record_state(&states, &name, ComponentState::Running);
            tasks.spawn(
                async move {
                    debug!(plugin = %name, "run started");
                    let result = catch_panic(runner.run(shutdown.clone())).await;
                    running.finish();

                    match result {
                        Ok(()) => {
                            record_state(&states, &name, ComponentState::Stopped);
                            debug!(plugin = %name, "run finished");
                        }
                        Err(e) => {
                            record_state(&states, &name, ComponentState::Failed);
                            error!(plugin = %name, error = %format!("{e:#}"), "run");
                            // Cancelled before offering so the driver always
                            // enters Stopping ahead of the outcome
                            shutdown.cancel();
                            slot.offer(Err(HostError::run(name, e)));
                        }
                    }
                }
                .in_current_span(),
            );
        }

        info!("{} plugins running", tasks.len());

        let mut drained = false;
        let mut stopping = false;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !stopping => {
                    stopping = true;
                    self.set_phase(LifecyclePhase::Stopping);
                }
                outcome = &mut outcome_rx => {
                    break outcome.unwrap_or_else(|_| {
                        Err(HostError::system("run outcome channel closed"))
                    });
                }
                joined = tasks.join_next(), if !drained => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => warn!("Run task ended abnormally: {}", e),
                    None => {
                        drained = true;
                        slot.offer(Ok(()));
                    }
                },
            }
        };

        shutdown.cancel();
        watcher.abort();
        (outcome, tasks)
    }
}

/// Turns a panic inside a plugin call into an ordinary error.
pub(super) async fn catch_panic<F>(future: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Listens for SIGINT (Ctrl+C) and, on Unix, SIGTERM.
///
/// The Unix handlers are installed by this call rather than on first poll,
/// so a signal arriving before the future is awaited is not lost. Must be
/// called from within a Tokio runtime.
#[cfg(unix)]
pub fn termination_signal() -> impl Future<Output = ShutdownReason> + Send + 'static {
    use signal::unix::{signal, SignalKind};

    let sigint = signal(SignalKind::interrupt());
    let sigterm = signal(SignalKind::terminate());
    async move {
        let reason = tokio::select! {
            reason = next_signal(sigint, "SIGINT") => reason,
            reason = next_signal(sigterm, "SIGTERM") => reason,
        };
        info!("Received termination request: {}", reason);
        reason
    }
}

#[cfg(unix)]
async fn next_signal(
    stream: std::io::Result<signal::unix::Signal>,
    name: &'static str,
) -> ShutdownReason {
    match stream {
        Ok(mut stream) => {
            stream.recv().await;
            ShutdownReason::Signal(name.to_string())
        }
        Err(e) => {
            error!("Failed to register {} handler: {}", name, e);
            std::future::pending().await
        }
    }
}

/// Listens for Ctrl+C.
#[cfg(not(unix))]
pub fn termination_signal() -> impl Future<Output = ShutdownReason> + Send + 'static {
    async {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received termination request: SIGINT");
                ShutdownReason::Signal("SIGINT".to_string())
            }
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending().await
            }
        }
    }
}
