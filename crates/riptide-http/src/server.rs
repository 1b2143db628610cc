//! Server instance: listeners, accept loops, connection registry,
//! graceful shutdown.
//!
//! One `HttpServer` lives on each shard. Everything it owns is
//! shard-local (`Rc`, `Cell`, `RefCell`): connections never migrate and
//! there are no locks on the fast path. `stop()` cancels accepts, shuts
//! down every live connection cooperatively, and resolves when the server
//! is quiescent: `stopping && accepts_in_flight == 0 &&
//! current_connections == 0`.

use crate::connection::Connection;
use crate::date::http_date_now;
use crate::stats::{ServerStats, StatsSnapshot};
use riptide_core::{RouteError, RouteTable};
use socket2::{Domain, Protocol, Socket, Type};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// A route-building function fanned out to every shard.
///
/// Must be deterministic: each shard applies it to its own table
/// independently and the tables are never reconciled.
pub type RouteBuilder = Arc<dyn Fn(&mut RouteTable) -> Result<(), RouteError> + Send + Sync>;

/// One shard's HTTP server.
pub struct HttpServer {
    name: String,
    routes: RefCell<Rc<RouteTable>>,
    builders: RefCell<Vec<RouteBuilder>>,
    connections: RefCell<HashMap<u64, Rc<Notify>>>,
    next_conn_id: Cell<u64>,
    stats: ServerStats,
    date: RefCell<String>,
    stopping: Cell<bool>,
    accepts_in_flight: Cell<u64>,
    abort_accept: Notify,
    quiesced: Notify,
}

impl HttpServer {
    /// Create a server and start its 1-second date-cache timer.
    ///
    /// Must be called from within a `LocalSet` (the timer and all
    /// connections are `spawn_local` tasks). The timer holds only a weak
    /// reference, so it dies with the server.
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let server = Rc::new(Self {
            name: name.into(),
            routes: RefCell::new(Rc::new(RouteTable::new())),
            builders: RefCell::new(Vec::new()),
            connections: RefCell::new(HashMap::new()),
            next_conn_id: Cell::new(0),
            stats: ServerStats::default(),
            date: RefCell::new(http_date_now()),
            stopping: Cell::new(false),
            accepts_in_flight: Cell::new(0),
            abort_accept: Notify::new(),
            quiesced: Notify::new(),
        });
        let weak = Rc::downgrade(&server);
        tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(server) = weak.upgrade() else { break };
                *server.date.borrow_mut() = http_date_now();
            }
        });
        server
    }

    /// Apply a route-building function, on top of those already applied.
    ///
    /// # Errors
    ///
    /// Propagates the builder's own error (e.g. `DuplicateRoute`); the
    /// previous table stays in place in that case.
    pub fn set_routes(&self, builder: RouteBuilder) -> Result<(), RouteError> {
        let mut table = RouteTable::new();
        for earlier in self.builders.borrow().iter() {
            earlier(&mut table)?;
        }
        builder(&mut table)?;
        self.builders.borrow_mut().push(builder);
        *self.routes.borrow_mut() = Rc::new(table);
        Ok(())
    }

    /// Snapshot of the current route table.
    ///
    /// Connections resolve routes against the snapshot they take, so a
    /// `set_routes` mid-request never invalidates an in-flight dispatch.
    #[must_use]
    pub fn routes(&self) -> Rc<RouteTable> {
        Rc::clone(&self.routes.borrow())
    }

    /// Bind `addr` (with `SO_REUSEADDR`/`SO_REUSEPORT`) and start
    /// accepting.
    ///
    /// # Errors
    ///
    /// Socket setup errors.
    pub fn listen(self: &Rc<Self>, addr: SocketAddr) -> io::Result<SocketAddr> {
        let listener = bind_listener(addr)?;
        self.listen_std(listener)
    }

    /// Start accepting on an already-bound listener. Multiple listeners
    /// may be added; each gets its own detached accept task.
    ///
    /// # Errors
    ///
    /// Conversion of the listener into the runtime fails.
    pub fn listen_std(self: &Rc<Self>, listener: std::net::TcpListener) -> io::Result<SocketAddr> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let addr = listener.local_addr()?;
        tracing::info!(server = %self.name, %addr, "listening");
        let server = Rc::clone(self);
        tokio::task::spawn_local(server.do_accepts(listener));
        Ok(addr)
    }

    async fn do_accepts(self: Rc<Self>, listener: TcpListener) {
        loop {
            if self.stopping.get() {
                break;
            }
            self.accepts_in_flight.set(self.accepts_in_flight.get() + 1);
            let accepted = tokio::select! {
                biased;
                _ = self.abort_accept.notified() => None,
                r = listener.accept() => Some(r),
            };
            self.accepts_in_flight.set(self.accepts_in_flight.get() - 1);
            match accepted {
                None => break,
                Some(Err(err)) => {
                    tracing::error!(server = %self.name, error = %err, "accept failed");
                    break;
                }
                Some(Ok((stream, peer))) => {
                    if self.stopping.get() {
                        break;
                    }
                    let _ = stream.set_nodelay(true);
                    tracing::debug!(server = %self.name, %peer, "accepted connection");
                    let conn = Connection::new(Rc::clone(&self), stream, peer);
                    // The connection is deleted (and deregistered) when
                    // this detached future resolves.
                    tokio::task::spawn_local(conn.process());
                }
            }
        }
        self.maybe_idle();
    }

    /// Initiate shutdown and wait for quiescence. Idempotent.
    pub async fn stop(&self) {
        self.stopping.set(true);
        self.abort_accept.notify_waiters();
        {
            let connections = self.connections.borrow();
            for shutdown in connections.values() {
                shutdown.notify_waiters();
            }
        }
        let mut quiesced = std::pin::pin!(self.quiesced.notified());
        loop {
            quiesced.as_mut().enable();
            if self.is_idle() {
                break;
            }
            quiesced.as_mut().await;
            quiesced.set(self.quiesced.notified());
        }
        tracing::info!(server = %self.name, "stopped");
    }

    fn is_idle(&self) -> bool {
        self.stopping.get()
            && self.accepts_in_flight.get() == 0
            && self.stats.current_connections() == 0
    }

    fn maybe_idle(&self) {
        if self.is_idle() {
            self.quiesced.notify_waiters();
        }
    }

    /// Whether `stop()` has been initiated.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.get()
    }

    /// Counter access.
    #[must_use]
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Copyable snapshot of all counters.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Connections accepted over the server's lifetime.
    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.stats.total_connections()
    }

    /// Connections currently alive.
    #[must_use]
    pub fn current_connections(&self) -> u64 {
        self.stats.current_connections()
    }

    /// Requests parsed and dispatched.
    #[must_use]
    pub fn requests_served(&self) -> u64 {
        self.stats.requests_served()
    }

    /// Read-side failures.
    #[must_use]
    pub fn read_errors(&self) -> u64 {
        self.stats.read_errors()
    }

    /// Write-side failures.
    #[must_use]
    pub fn respond_errors(&self) -> u64 {
        self.stats.respond_errors()
    }

    /// Cached HTTP date string, refreshed once per second.
    #[must_use]
    pub fn date(&self) -> String {
        self.date.borrow().clone()
    }

    pub(crate) fn register_connection(&self, shutdown: Rc<Notify>) -> u64 {
        let id = self.next_conn_id.get();
        self.next_conn_id.set(id + 1);
        self.connections.borrow_mut().insert(id, shutdown);
        self.stats.connection_opened();
        id
    }

    pub(crate) fn connection_dropped(&self, id: u64) {
        self.connections.borrow_mut().remove(&id);
        self.stats.connection_closed();
        self.maybe_idle();
    }
}

/// Build a listening socket with `SO_REUSEADDR` (and `SO_REUSEPORT` on
/// unix, so every shard can bind the same address and the kernel spreads
/// accepts across them).
///
/// # Errors
///
/// Any socket setup failure.
pub fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_block_on<F: std::future::Future>(fut: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, fut)
    }

    #[test]
    fn bind_listener_assigns_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn two_listeners_share_a_port_with_reuseport() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_listener(addr).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), addr.port());
    }

    #[test]
    fn stop_with_no_connections_resolves() {
        shard_block_on(async {
            let server = HttpServer::new("test");
            let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();
            assert_ne!(addr.port(), 0);
            server.stop().await;
            assert_eq!(server.current_connections(), 0);
            assert!(server.is_stopping());
        });
    }

    #[test]
    fn stop_is_idempotent() {
        shard_block_on(async {
            let server = HttpServer::new("test");
            server.stop().await;
            server.stop().await;
        });
    }

    #[test]
    fn set_routes_duplicate_keeps_previous_table() {
        shard_block_on(async {
            use riptide_core::{FunctionHandler, Method, Reply};
            let server = HttpServer::new("test");
            server
                .set_routes(Arc::new(|r: &mut RouteTable| {
                    r.add(
                        Method::Get,
                        "/",
                        FunctionHandler::new(|_req, rep: Reply| std::future::ready(Ok(rep))),
                    )?;
                    Ok(())
                }))
                .unwrap();
            let err = server.set_routes(Arc::new(|r: &mut RouteTable| {
                r.add(
                    Method::Get,
                    "/",
                    FunctionHandler::new(|_req, rep: Reply| std::future::ready(Ok(rep))),
                )?;
                Ok(())
            }));
            assert!(err.is_err());
            // The original route is still there.
            assert_eq!(server.routes().len(), 1);
        });
    }
}
