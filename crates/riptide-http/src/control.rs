//! Sharded controller: replicates the server across execution shards.
//!
//! Each shard is an OS thread running a single-threaded runtime with a
//! `LocalSet`; the shard's server, route table, connections, and counters
//! never leave it. The controller owns one command channel per shard and
//! fans configuration out by message — there is no shared mutable state
//! between shards.

use crate::server::{bind_listener, HttpServer, RouteBuilder};
use crate::stats::StatsSnapshot;
use riptide_core::{RouteError, RouteTable};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Controller failure.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A shard thread is gone (channel closed or ack dropped).
    #[error("shard terminated")]
    ShardGone,
    /// Socket or runtime I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A route builder failed on some shard.
    #[error(transparent)]
    Route(#[from] RouteError),
}

enum ShardCommand {
    SetRoutes {
        builder: RouteBuilder,
        ack: oneshot::Sender<Result<(), RouteError>>,
    },
    Listen {
        listener: std::net::TcpListener,
        ack: oneshot::Sender<io::Result<SocketAddr>>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
    Stats {
        ack: oneshot::Sender<StatsSnapshot>,
    },
}

struct Shard {
    tx: mpsc::UnboundedSender<ShardCommand>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Handle for starting, configuring, and stopping the sharded server.
///
/// Typical use:
///
/// ```ignore
/// let control = ServerControl::start("httpd", shards)?;
/// control.set_routes(set_routes).await?;
/// let addr = control.listen("0.0.0.0:10000".parse()?).await?;
/// // ...
/// control.stop().await?;
/// control.shutdown();
/// ```
pub struct ServerControl {
    shards: Vec<Shard>,
}

impl ServerControl {
    /// Spawn `shard_count` shard threads (at least one), each running an
    /// idle server instance awaiting configuration.
    ///
    /// # Errors
    ///
    /// Thread spawn failure.
    pub fn start(name: &str, shard_count: usize) -> io::Result<Self> {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for shard_id in 0..shard_count {
            let (tx, rx) = mpsc::unbounded_channel();
            let server_name = format!("{name}-{shard_id}");
            let thread = std::thread::Builder::new()
                .name(format!("shard-{shard_id}"))
                .spawn(move || run_shard(&server_name, rx))?;
            shards.push(Shard {
                tx,
                thread: Some(thread),
            });
        }
        Ok(Self { shards })
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Run a route-building function on every shard's table.
    ///
    /// The function must be deterministic: each shard applies it
    /// independently and the tables are never reconciled.
    ///
    /// # Errors
    ///
    /// The first builder failure from any shard, or `ShardGone`.
    pub async fn set_routes<F>(&self, builder: F) -> Result<(), ControlError>
    where
        F: Fn(&mut RouteTable) -> Result<(), RouteError> + Send + Sync + 'static,
    {
        let builder: RouteBuilder = Arc::new(builder);
        let results = self
            .fanout(|ack| ShardCommand::SetRoutes {
                builder: Arc::clone(&builder),
                ack,
            })
            .await?;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Bind `addr` on every shard (one `SO_REUSEPORT` listener each) and
    /// start accepting. Returns the bound address; when `addr` has port
    /// 0, the first bind fixes the concrete port for the other shards.
    ///
    /// # Errors
    ///
    /// Socket setup failure on any shard, or `ShardGone`.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, ControlError> {
        let mut bound = addr;
        let mut listeners = Vec::with_capacity(self.shards.len());
        for _ in &self.shards {
            let listener = bind_listener(bound)?;
            if bound.port() == 0 {
                bound = listener.local_addr()?;
            }
            listeners.push(listener);
        }

        let mut pending = Vec::with_capacity(self.shards.len());
        for (shard, listener) in self.shards.iter().zip(listeners) {
            let (ack_tx, ack_rx) = oneshot::channel();
            shard
                .tx
                .send(ShardCommand::Listen {
                    listener,
                    ack: ack_tx,
                })
                .map_err(|_| ControlError::ShardGone)?;
            pending.push(ack_rx);
        }
        for ack in pending {
            let _ = ack.await.map_err(|_| ControlError::ShardGone)??;
        }
        Ok(bound)
    }

    /// Stop every shard's server and wait until each reports quiescence.
    ///
    /// # Errors
    ///
    /// `ShardGone` when a shard thread died before acknowledging.
    pub async fn stop(&self) -> Result<(), ControlError> {
        self.fanout(|ack| ShardCommand::Stop { ack }).await?;
        Ok(())
    }

    /// Per-shard counter snapshots, in shard order. Sum them for totals.
    ///
    /// # Errors
    ///
    /// `ShardGone` when a shard thread died before answering.
    pub async fn stats(&self) -> Result<Vec<StatsSnapshot>, ControlError> {
        self.fanout(|ack| ShardCommand::Stats { ack }).await
    }

    /// Close the command channels and join the shard threads. Call after
    /// [`stop`](Self::stop) for a clean exit.
    pub fn shutdown(mut self) {
        for shard in self.shards.drain(..) {
            drop(shard.tx);
            if let Some(thread) = shard.thread {
                let _ = thread.join();
            }
        }
    }

    async fn fanout<T>(
        &self,
        make: impl Fn(oneshot::Sender<T>) -> ShardCommand,
    ) -> Result<Vec<T>, ControlError> {
        let mut pending = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let (ack_tx, ack_rx) = oneshot::channel();
            shard
                .tx
                .send(make(ack_tx))
                .map_err(|_| ControlError::ShardGone)?;
            pending.push(ack_rx);
        }
        let mut results = Vec::with_capacity(pending.len());
        for ack in pending {
            results.push(ack.await.map_err(|_| ControlError::ShardGone)?);
        }
        Ok(results)
    }
}

fn run_shard(name: &str, mut commands: mpsc::UnboundedReceiver<ShardCommand>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(shard = %name, error = %err, "failed to build shard runtime");
            return;
        }
    };
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let server = HttpServer::new(name);
        while let Some(command) = commands.recv().await {
            match command {
                ShardCommand::SetRoutes { builder, ack } => {
                    let _ = ack.send(server.set_routes(builder));
                }
                ShardCommand::Listen { listener, ack } => {
                    let _ = ack.send(server.listen_std(listener));
                }
                ShardCommand::Stop { ack } => {
                    server.stop().await;
                    let _ = ack.send(());
                }
                ShardCommand::Stats { ack } => {
                    let _ = ack.send(server.stats_snapshot());
                }
            }
        }
    });
}
