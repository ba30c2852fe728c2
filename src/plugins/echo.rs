use crate::config::Slot;
use crate::flags::{Flag, FlagSet};
use crate::plugin::{Flagger, Plugin, Runner};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    pub addr: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6060".to_string(),
        }
    }
}

/// TCP server that writes every received chunk back to its sender.
///
/// The listener is bound in `init` so an unusable address fails startup
/// instead of the run phase.
#[derive(Debug)]
pub struct EchoServer {
    config: Slot<EchoConfig>,
    max_connections: Flag<u32>,
    idle_timeout: Flag<Duration>,
    uppercase: Flag<bool>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl EchoServer {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            config: Slot::new(config),
            max_connections: Flag::new(64),
            idle_timeout: Flag::new(Duration::from_secs(30)),
            uppercase: Flag::new(false),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Slot<EchoConfig> {
        self.config.clone()
    }

    /// Address actually bound, known once `init` succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

impl Default for EchoServer {
    fn default() -> Self {
        Self::new(EchoConfig::default())
    }
}

#[async_trait]
impl Plugin for EchoServer {
    fn name(&self) -> &str {
        "echo"
    }

    async fn init(&self) -> anyhow::Result<()> {
        let addr = self.config.read().addr.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("listen on {addr}"))?;
        let local_addr = listener.local_addr()?;

        info!(address = %local_addr, "Echo listener bound");
        *self.local_addr.lock() = Some(local_addr);
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    async fn fini(&self) -> anyhow::Result<()> {
        // Dropped here when the run phase never took it
        self.listener.lock().take();
        self.local_addr.lock().take();
        Ok(())
    }

    fn as_flagger(&self) -> Option<&dyn Flagger> {
        Some(self)
    }

    fn as_runner(self: Arc<Self>) -> Option<Arc<dyn Runner>> {
        Some(self)
    }
}

impl Flagger for EchoServer {
    fn set_flags(&self, flags: &mut FlagSet) {
        flags.uint_var(
            &self.max_connections,
            "max_connections",
            self.max_connections.get(),
            "maximum concurrent connections",
        );
        flags.duration_var(
            &self.idle_timeout,
            "idle_timeout",
            self.idle_timeout.get(),
            "close connections idle for this long",
        );
        flags.bool_var(
            &self.uppercase,
            "uppercase",
            self.uppercase.get(),
            "echo text in upper case",
        );
    }
}

#[async_trait]
impl Runner for EchoServer {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .context("listener is not bound")?;

        let limit = Arc::new(Semaphore::new(self.max_connections.get().max(1) as usize));
        let idle_timeout = self.idle_timeout.get();
        let uppercase = self.uppercase.get();
        let mut connections = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => permit?,
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted.context("accept")?,
            };

            debug!(peer = %peer, "Connection accepted");
            connections.spawn(async move {
                let _permit = permit;
                if let Err(e) = echo(stream, idle_timeout, uppercase).await {
                    warn!(peer = %peer, "Connection closed with error: {}", e);
                }
            });

            // Reap finished connections so the set does not grow unbounded
            while connections.try_join_next().is_some() {}
        }

        info!("Echo server stopping, closing {} connections", connections.len());
        connections.shutdown().await;
        Ok(())
    }
}

async fn echo(
    mut stream: TcpStream,
    idle_timeout: Duration,
    uppercase: bool,
) -> std::io::Result<()> {
    let mut buffer = [0u8; 4096];
    loop {
        let read = match tokio::time::timeout(idle_timeout, stream.read(&mut buffer)).await {
            Ok(read) => read?,
            Err(_) => return Ok(()),
        };
        if read == 0 {
            return Ok(());
        }

        let chunk = &mut buffer[..read];
        if uppercase {
            chunk.make_ascii_uppercase();
        }
        stream.write_all(chunk).await?;
    }
}
