use crate::plugin::{Plugin, Runner};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Logs a tick at a fixed interval until cancelled.
#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    beats: AtomicU64,
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            beats: AtomicU64::new(0),
        }
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Plugin for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn init(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.period.is_zero(), "heartbeat period must be positive");
        self.beats.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn fini(&self) -> anyhow::Result<()> {
        info!("Heartbeat stopped after {} beats", self.beats());
        Ok(())
    }

    fn as_runner(self: Arc<Self>) -> Option<Arc<dyn Runner>> {
        Some(self)
    }
}

#[async_trait]
impl Runner for Heartbeat {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(beat, "heartbeat");
                }
            }
        }
    }
}
