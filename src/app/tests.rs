use super::*;
use crate::error::HostError;
use crate::plugin::{Plugin, Runner};
use crate::registry::Registry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Barrier};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone)]
enum RunMode {
    None,
    ReturnOk,
    Fail(&'static str),
    FailTogether(Arc<Barrier>),
    UntilCancelled,
    FailAfterCancel(Duration),
    IgnoreCancel,
    Panic,
}

struct Scripted {
    name: String,
    log: CallLog,
    fail_init: bool,
    fail_fini: bool,
    mode: RunMode,
    phase: Option<watch::Receiver<LifecyclePhase>>,
}

impl Scripted {
    fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_init: false,
            fail_fini: false,
            mode: RunMode::None,
            phase: None,
        }
    }

    fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn failing_fini(mut self) -> Self {
        self.fail_fini = true;
        self
    }

    fn running(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Records the lifecycle phase seen from inside `fini`.
    fn observing(mut self, phase: watch::Receiver<LifecyclePhase>) -> Self {
        self.phase = Some(phase);
        self
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl Plugin for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> anyhow::Result<()> {
        self.record("init");
        if self.fail_init {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    async fn fini(&self) -> anyhow::Result<()> {
        self.record("fini");
        if let Some(phase) = &self.phase {
            let phase = *phase.borrow();
            self.record(&format!("{phase:?}"));
        }
        if self.fail_fini {
            anyhow::bail!("close failed");
        }
        Ok(())
    }

    fn as_runner(self: Arc<Self>) -> Option<Arc<dyn Runner>> {
        if matches!(self.mode, RunMode::None) {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait]
impl Runner for Scripted {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.record("run");
        match &self.mode {
            RunMode::None | RunMode::ReturnOk => Ok(()),
            RunMode::Fail(message) => anyhow::bail!("{}", message),
            RunMode::FailTogether(barrier) => {
                barrier.wait().await;
                anyhow::bail!("{} failed", self.name)
            }
            RunMode::UntilCancelled => {
                shutdown.cancelled().await;
                self.record("stopped");
                Ok(())
            }
            RunMode::FailAfterCancel(delay) => {
                shutdown.cancelled().await;
                tokio::time::sleep(*delay).await;
                anyhow::bail!("flush failed")
            }
            RunMode::IgnoreCancel => {
                pending::<()>().await;
                Ok(())
            }
            RunMode::Panic => panic!("boom"),
        }
    }
}

fn entries(log: &CallLog) -> Vec<String> {
    log.lock().clone()
}

fn never() -> impl Future<Output = ShutdownReason> + Send + 'static {
    pending()
}

/// Termination request fired from the test after `delay`.
fn request_after(delay: Duration) -> impl Future<Output = ShutdownReason> + Send + 'static {
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
        ShutdownReason::Requested("test".to_string())
    }
}

fn lifecycle_with_grace(grace_period: Duration) -> Lifecycle {
    Lifecycle::new(LifecycleOptions { grace_period })
}

#[tokio::test]
async fn test_single_plugin_end_to_end() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("x", &log).running(RunMode::ReturnOk)),
        None,
    );

    let lifecycle = Lifecycle::default();
    let report = lifecycle.run_until(&registry, never()).await;

    assert!(report.is_success());
    assert!(report.finalize_failures.is_empty());
    assert!(report.abandoned.is_empty());
    assert_eq!(entries(&log), vec!["init:x", "run:x", "fini:x"]);
    assert_eq!(lifecycle.phase(), LifecyclePhase::Finalized);
    assert_eq!(
        lifecycle.component_state("x"),
        Some(ComponentState::Finalized)
    );
}

#[tokio::test]
async fn test_init_in_order_and_fini_in_reverse() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    for name in ["a", "b", "c", "d"] {
        registry.register(Arc::new(Scripted::new(name, &log)), None);
    }

    let report = Lifecycle::default().run_until(&registry, never()).await;

    assert!(report.is_success());
    assert_eq!(
        entries(&log),
        vec!["init:a", "init:b", "init:c", "init:d", "fini:d", "fini:c", "fini:b", "fini:a"]
    );
}

#[tokio::test]
async fn test_init_failure_skips_run_and_finalize() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("a", &log).running(RunMode::ReturnOk)),
        None,
    );
    registry.register(Arc::new(Scripted::new("b", &log).failing_init()), None);
    registry.register(Arc::new(Scripted::new("c", &log)), None);

    let lifecycle = Lifecycle::default();
    let report = lifecycle.run_until(&registry, never()).await;

    match report.outcome {
        Err(HostError::Init { ref component, .. }) => assert_eq!(component, "b"),
        ref other => panic!("expected init failure, got {other:?}"),
    }
    assert_eq!(entries(&log), vec!["init:a", "init:b"]);
    assert_eq!(lifecycle.phase(), LifecyclePhase::Failed);
    assert_eq!(
        lifecycle.component_state("a"),
        Some(ComponentState::Initialized)
    );
    assert_eq!(lifecycle.component_state("b"), Some(ComponentState::Failed));
    assert_eq!(
        lifecycle.component_state("c"),
        Some(ComponentState::Registered)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_run_failures_yield_one_outcome() {
    let log = CallLog::default();
    let barrier = Arc::new(Barrier::new(2));
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("a", &log).running(RunMode::FailTogether(Arc::clone(&barrier)))),
        None,
    );
    registry.register(
        Arc::new(Scripted::new("b", &log).running(RunMode::FailTogether(Arc::clone(&barrier)))),
        None,
    );
    registry.register(
        Arc::new(Scripted::new("c", &log).running(RunMode::UntilCancelled)),
        None,
    );
    registry.register(Arc::new(Scripted::new("d", &log)), None);

    let report = Lifecycle::default().run_until(&registry, never()).await;

    match &report.outcome {
        Err(HostError::Run { component, .. }) => {
            assert!(component == "a" || component == "b", "{component}")
        }
        other => panic!("expected run failure, got {other:?}"),
    }
    assert!(report.finalize_failures.is_empty());

    let log = entries(&log);
    for name in ["a", "b", "c", "d"] {
        let fini = format!("fini:{name}");
        assert_eq!(log.iter().filter(|e| **e == fini).count(), 1, "{log:?}");
    }
}

#[tokio::test]
async fn test_run_failure_cancels_other_plugins() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("server", &log).running(RunMode::UntilCancelled)),
        None,
    );
    registry.register(
        Arc::new(Scripted::new("backend", &log).running(RunMode::Fail("bind failed"))),
        None,
    );

    let lifecycle = Lifecycle::default();
    let report = lifecycle.run_until(&registry, never()).await;

    let err = report.into_result().unwrap_err();
    assert_eq!(err.to_string(), "run backend plugin: bind failed");
    assert_eq!(err.exit_code(), 4);

    assert_eq!(
        lifecycle.component_state("backend"),
        Some(ComponentState::Finalized)
    );
}

#[tokio::test(start_paused = true)]
async fn test_termination_with_cooperative_plugins_is_clean() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("a", &log).running(RunMode::UntilCancelled)),
        None,
    );
    registry.register(
        Arc::new(Scripted::new("b", &log).running(RunMode::UntilCancelled)),
        None,
    );

    let grace = Duration::from_secs(10);
    let start = Instant::now();
    let report = lifecycle_with_grace(grace)
        .run_until(&registry, request_after(Duration::from_secs(1)))
        .await;

    assert!(report.is_success(), "{:?}", report.outcome);
    assert!(report.abandoned.is_empty());
    assert!(start.elapsed() < grace);

    let log = entries(&log);
    assert!(log.contains(&"stopped:a".to_string()));
    assert!(log.contains(&"stopped:b".to_string()));
    assert_eq!(&log[log.len() - 2..], &["fini:b", "fini:a"]);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_cancellation_forces_exit_after_grace_period() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("polite", &log).running(RunMode::UntilCancelled)),
        None,
    );
    registry.register(
        Arc::new(Scripted::new("stuck", &log).running(RunMode::IgnoreCancel)),
        None,
    );

    let grace = Duration::from_secs(10);
    let delay = Duration::from_secs(1);
    let start = Instant::now();
    let report = lifecycle_with_grace(grace)
        .run_until(&registry, request_after(delay))
        .await;

    assert!(start.elapsed() >= delay + grace);
    match &report.outcome {
        Err(HostError::ForcedExit { grace_period }) => assert_eq!(*grace_period, grace),
        other => panic!("expected forced exit, got {other:?}"),
    }
    assert_eq!(report.abandoned, vec!["stuck".to_string()]);

    let log = entries(&log);
    assert!(log.contains(&"fini:stuck".to_string()));
    assert!(log.contains(&"fini:polite".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_forced_exit_is_not_declared_early() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("stuck", &log).running(RunMode::IgnoreCancel)),
        None,
    );

    let grace = Duration::from_secs(30);
    let lifecycle = lifecycle_with_grace(grace);
    let run = lifecycle.run_until(&registry, request_after(Duration::ZERO));
    tokio::pin!(run);

    let early = tokio::time::timeout(grace - Duration::from_secs(1), &mut run).await;
    assert!(early.is_err(), "outcome resolved before the grace period");

    let report = run.await;
    assert_eq!(report.into_result().unwrap_err().exit_code(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_phase_is_stopping_during_grace_period() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("stuck", &log).running(RunMode::IgnoreCancel)),
        None,
    );

    let lifecycle = lifecycle_with_grace(Duration::from_secs(10));
    assert_eq!(lifecycle.grace_period(), Duration::from_secs(10));
    let run = lifecycle.run_until(&registry, request_after(Duration::from_secs(1)));
    tokio::pin!(run);

    let waiting = tokio::time::timeout(Duration::from_secs(6), &mut run).await;
    assert!(waiting.is_err());
    assert_eq!(lifecycle.phase(), LifecyclePhase::Stopping);

    run.await;
    assert_eq!(lifecycle.phase(), LifecyclePhase::Finalized);
}

#[tokio::test]
async fn test_clean_completion_finalizes_without_stopping() {
    let log = CallLog::default();
    let lifecycle = Lifecycle::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(
            Scripted::new("job", &log)
                .running(RunMode::ReturnOk)
                .observing(lifecycle.subscribe_phase()),
        ),
        None,
    );

    let report = lifecycle.run_until(&registry, never()).await;

    assert!(report.is_success());
    assert_eq!(entries(&log), vec!["init:job", "run:job", "fini:job", "Running:job"]);
}

#[tokio::test]
async fn test_run_failure_finalizes_while_stopping() {
    let log = CallLog::default();
    let lifecycle = Lifecycle::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(
            Scripted::new("backend", &log)
                .running(RunMode::Fail("bind failed"))
                .observing(lifecycle.subscribe_phase()),
        ),
        None,
    );

    let report = lifecycle.run_until(&registry, never()).await;

    assert!(matches!(report.outcome, Err(HostError::Run { .. })));
    assert_eq!(
        entries(&log),
        vec!["init:backend", "run:backend", "fini:backend", "Stopping:backend"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_within_grace_period_is_a_run_failure() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("polite", &log).running(RunMode::UntilCancelled)),
        None,
    );
    registry.register(
        Arc::new(
            Scripted::new("late", &log).running(RunMode::FailAfterCancel(Duration::from_secs(2))),
        ),
        None,
    );

    let grace = Duration::from_secs(10);
    let delay = Duration::from_secs(1);
    let start = Instant::now();
    let report = lifecycle_with_grace(grace)
        .run_until(&registry, request_after(delay))
        .await;

    assert!(start.elapsed() < delay + grace);
    match &report.outcome {
        Err(HostError::Run { component, .. }) => assert_eq!(component, "late"),
        other => panic!("expected run failure, got {other:?}"),
    }
    assert!(report.abandoned.is_empty());

    let log = entries(&log);
    assert_eq!(&log[log.len() - 2..], &["fini:late", "fini:polite"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_termination_signal_listens_before_first_poll() {
    let termination = termination_signal();

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let reason = tokio::time::timeout(Duration::from_secs(5), termination)
        .await
        .unwrap();
    assert_eq!(reason, ShutdownReason::Signal("SIGTERM".to_string()));
}

#[tokio::test]
async fn test_finalize_failure_does_not_stop_others() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("first", &log).running(RunMode::ReturnOk)),
        None,
    );
    registry.register(Arc::new(Scripted::new("middle", &log).failing_fini()), None);
    registry.register(Arc::new(Scripted::new("third", &log)), None);

    let lifecycle = Lifecycle::default();
    let report = lifecycle.run_until(&registry, never()).await;

    assert!(report.outcome.is_ok());
    assert_eq!(report.finalize_failures.len(), 1);
    assert_eq!(report.finalize_failures[0].component(), Some("middle"));

    let log = entries(&log);
    assert_eq!(
        &log[log.len() - 3..],
        &["fini:third", "fini:middle", "fini:first"]
    );
    assert_eq!(
        lifecycle.component_state("middle"),
        Some(ComponentState::Failed)
    );
}

#[tokio::test]
async fn test_finalize_failure_does_not_replace_run_failure() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(
            Scripted::new("backend", &log)
                .running(RunMode::Fail("listener closed"))
                .failing_fini(),
        ),
        None,
    );

    let report = Lifecycle::default().run_until(&registry, never()).await;

    assert_eq!(report.finalize_failures.len(), 1);
    assert!(matches!(report.outcome, Err(HostError::Run { .. })));
}

#[tokio::test]
async fn test_panicking_runner_is_a_run_failure() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(
        Arc::new(Scripted::new("flaky", &log).running(RunMode::Panic)),
        None,
    );

    let report = Lifecycle::default().run_until(&registry, never()).await;

    let err = report.into_result().unwrap_err();
    assert_eq!(err.component(), Some("flaky"));
    assert!(err.to_string().contains("panicked: boom"));
}

#[tokio::test]
async fn test_plugins_without_runner_complete_immediately() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(Arc::new(Scripted::new("config", &log)), None);

    let report = Lifecycle::default().run_until(&registry, never()).await;

    assert!(report.is_success());
    assert_eq!(entries(&log), vec!["init:config", "fini:config"]);
}

#[tokio::test]
async fn test_lifecycle_runs_once() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(Arc::new(Scripted::new("a", &log)), None);

    let lifecycle = Lifecycle::default();
    assert!(lifecycle.run_until(&registry, never()).await.is_success());

    let second = lifecycle.run_until(&registry, never()).await;
    assert!(matches!(second.outcome, Err(HostError::System { .. })));
    assert_eq!(entries(&log), vec!["init:a", "fini:a"]);
}

#[tokio::test]
async fn test_phase_watch_reports_final_phase() {
    let log = CallLog::default();
    let mut registry = Registry::new();
    registry.register(Arc::new(Scripted::new("a", &log)), None);

    let lifecycle = Lifecycle::default();
    let phase = lifecycle.subscribe_phase();
    assert_eq!(*phase.borrow(), LifecyclePhase::Uninitialized);

    lifecycle.run_until(&registry, never()).await;
    assert_eq!(*phase.borrow(), LifecyclePhase::Finalized);
}

#[test]
fn test_shutdown_reason_display() {
    assert_eq!(
        ShutdownReason::Signal("SIGTERM".to_string()).to_string(),
        "received SIGTERM"
    );
    assert_eq!(
        ShutdownReason::Requested("operator".to_string()).to_string(),
        "requested: operator"
    );
    assert_eq!(LifecycleOptions::default().grace_period, DEFAULT_GRACE_PERIOD);
}
