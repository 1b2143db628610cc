//! Per-connection duplex state machine.
//!
//! Each connection runs two cooperative fibers joined in one task: a
//! *reader* that parses requests and produces replies, and a *responder*
//! that writes them in order. They communicate through a bounded reply
//! queue (capacity [`REPLY_QUEUE_DEPTH`]) whose `None` sentinel signals
//! reader EOF, so a slow client can never let the reader run more than
//! ten replies ahead of the wire.
//!
//! The reader drives the status cell through the three terminal outcomes:
//!
//! - `Close` — the responder drains and both ends of the stream close;
//! - `Detach` — a WebSocket upgrade was answered; both fibers exit
//!   *without* closing the stream, which is handed (together with any
//!   bytes already buffered past the upgrade request) to the WS handler.
//!
//! Errors inside either fiber are swallowed at the fiber tail; only the
//! server counters and logging observe them.

use crate::parser::{ParseError, ParseStatus, RequestParser};
use crate::query::split_query;
use crate::server::HttpServer;
use riptide_core::{websocket_accept_key, ConnectedWebsocket, Reply, Request, StatusCode};
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Maximum number of pipelined replies in flight per connection.
pub const REPLY_QUEUE_DEPTH: usize = 10;

/// `Server` header token stamped on every reply.
pub const SERVER_NAME: &str = "riptide httpd";

/// Connection status, driven exclusively by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Keep serving requests (initial).
    KeepOpen,
    /// Terminal: close both directions once pending replies are written.
    Close,
    /// Terminal: hand the transport to a WebSocket handler.
    Detach,
}

#[derive(Debug, Error)]
enum ReadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One accepted connection.
///
/// Registered with its server on construction; the drop guard removes it
/// and updates `current_connections`, so the counter is exact at all
/// times. A single call to [`process`](Self::process) drives the
/// connection to completion.
pub struct Connection {
    ctx: Ctx,
    stream: TcpStream,
    parser: RequestParser,
    guard: ConnGuard,
}

/// State shared by the two fibers.
struct Ctx {
    server: Rc<HttpServer>,
    peer: SocketAddr,
    status: Cell<ConnectionStatus>,
    shutdown: Rc<Notify>,
    /// Request retained by a successful upgrade, dispatched after join.
    upgraded: RefCell<Option<Request>>,
}

struct ConnGuard {
    server: Rc<HttpServer>,
    id: u64,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.server.connection_dropped(self.id);
    }
}

impl Connection {
    /// Register a freshly accepted connection with its server.
    pub fn new(server: Rc<HttpServer>, stream: TcpStream, peer: SocketAddr) -> Self {
        let shutdown = Rc::new(Notify::new());
        let id = server.register_connection(Rc::clone(&shutdown));
        Self {
            guard: ConnGuard {
                server: Rc::clone(&server),
                id,
            },
            ctx: Ctx {
                server,
                peer,
                status: Cell::new(ConnectionStatus::KeepOpen),
                shutdown,
                upgraded: RefCell::new(None),
            },
            stream,
            parser: RequestParser::new(),
        }
    }

    /// Drive the connection to completion. Never fails: every error is
    /// absorbed into counters and logs before this future resolves.
    pub async fn process(self) {
        let Connection {
            ctx,
            mut stream,
            mut parser,
            guard,
        } = self;

        let mut tail = Vec::new();
        {
            let (read_half, write_half) = stream.split();
            let mut reader = BufReader::new(read_half);
            let mut writer = BufWriter::new(write_half);
            let (tx, rx) = mpsc::channel(REPLY_QUEUE_DEPTH);

            tokio::join!(
                ctx.read_loop(&mut reader, &mut parser, tx),
                ctx.respond_loop(&mut writer, rx),
            );

            if ctx.status.get() == ConnectionStatus::Detach {
                let _ = writer.flush().await;
                tail.extend_from_slice(reader.buffer());
            }
        }

        if ctx.status.get() == ConnectionStatus::Detach {
            let upgraded = ctx.upgraded.borrow_mut().take();
            if let Some(req) = upgraded {
                // Bytes past the upgrade request belong to the session:
                // first whatever the parser had, then the read buffer.
                let mut buffered = parser.take_leftover();
                buffered.extend_from_slice(&tail);
                let ws = ConnectedWebsocket::new(stream, buffered)
                    .with_shutdown(Rc::clone(&ctx.shutdown));
                let path = req.path.clone();
                let routes = ctx.server.routes();
                if let Err(err) = routes.handle_ws(&path, ws, req).await {
                    tracing::error!(error = %err, peer = %ctx.peer, "websocket handler failed");
                }
            }
        }
        drop(guard);
    }
}

impl Ctx {
    async fn read_loop(
        &self,
        reader: &mut BufReader<ReadHalf<'_>>,
        parser: &mut RequestParser,
        tx: mpsc::Sender<Option<Reply>>,
    ) {
        let result = self.read_requests(reader, parser, &tx).await;
        if result.is_err() {
            self.server.stats().inc_read_errors();
        }
        if self.status.get() != ConnectionStatus::Detach {
            // Sentinel tells the responder the reader is done. On detach
            // the queue is simply dropped; the responder exits through
            // the status check after writing the 101.
            let _ = tx.send(None).await;
        }
    }

    async fn read_requests(
        &self,
        reader: &mut BufReader<ReadHalf<'_>>,
        parser: &mut RequestParser,
        tx: &mpsc::Sender<Option<Reply>>,
    ) -> Result<(), ReadError> {
        while self.status.get() == ConnectionStatus::KeepOpen {
            if self.server.is_stopping() {
                self.status.set(ConnectionStatus::Close);
                break;
            }
            let parsed = tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    self.status.set(ConnectionStatus::Close);
                    break;
                }
                r = read_one(reader, parser) => r?,
            };
            let Some(req) = parsed else {
                // Clean EOF between requests.
                self.status.set(ConnectionStatus::Close);
                break;
            };
            self.server.stats().inc_requests_served();

            // Backpressure: wait for a queue slot before generating.
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    self.status.set(ConnectionStatus::Close);
                    break;
                }
                p = tx.reserve() => match p {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.status.set(ConnectionStatus::Close);
                        break;
                    }
                },
            };
            let status = self.generate_reply(req, permit).await;
            self.status.set(status);
        }
        Ok(())
    }

    /// Produce the reply for one request and push it; returns the next
    /// connection status.
    async fn generate_reply(
        &self,
        mut req: Request,
        permit: mpsc::Permit<'_, Option<Reply>>,
    ) -> ConnectionStatus {
        split_query(&mut req);

        let mut keep_alive = false;
        let mut close_requested = false;
        if let Some(value) = req.headers.get("Connection") {
            if value.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            } else if value.eq_ignore_ascii_case("close") {
                close_requested = true;
            } else if value.to_ascii_lowercase().contains("upgrade") {
                let is_websocket = req
                    .headers
                    .get("Upgrade")
                    .is_some_and(|u| u.eq_ignore_ascii_case("websocket"));
                if is_websocket && self.server.routes().get_ws_handler(&req.path).is_some() {
                    return self.upgrade_websocket(req, permit);
                }
            }
        }

        let mut rep = Reply::new();
        rep.set_version(req.version.clone());
        let should_close = match req.version.as_str() {
            "1.0" => {
                if keep_alive {
                    rep.headers.set("Connection", "Keep-Alive");
                }
                !keep_alive
            }
            "1.1" => close_requested,
            // HTTP/0.9 and anything unrecognized.
            _ => true,
        };

        let version = req.version.clone();
        let method = req.method;
        let path = req.path.clone();
        let routes = self.server.routes();
        let mut rep = routes.handle(method, &path, req, rep).await;
        rep.set_version(version);
        rep.done();
        permit.send(Some(rep));

        if should_close {
            ConnectionStatus::Close
        } else {
            ConnectionStatus::KeepOpen
        }
    }

    /// Answer a WebSocket upgrade. Both outcomes detach: on success the
    /// request is retained for dispatch after the fibers join; a refusal
    /// writes a 400 and the connection just drains and exits.
    fn upgrade_websocket(
        &self,
        req: Request,
        permit: mpsc::Permit<'_, Option<Reply>>,
    ) -> ConnectionStatus {
        let mut rep = Reply::new();
        rep.set_version(req.version.clone());
        let key = req.headers.get("Sec-WebSocket-Key").map(str::to_string);
        let routed = self.server.routes().get_ws_handler(&req.path).is_some();
        match key {
            Some(key) if routed => {
                rep.headers.set("Upgrade", "websocket");
                rep.headers.set("Connection", "Upgrade");
                rep.headers
                    .set("Sec-WebSocket-Accept", websocket_accept_key(&key));
                rep.set_status(StatusCode::SwitchingProtocols);
                *self.upgraded.borrow_mut() = Some(req);
            }
            _ => {
                rep.set_status(StatusCode::BadRequest);
            }
        }
        rep.done();
        permit.send(Some(rep));
        ConnectionStatus::Detach
    }

    async fn respond_loop(
        &self,
        writer: &mut BufWriter<WriteHalf<'_>>,
        mut rx: mpsc::Receiver<Option<Reply>>,
    ) {
        let result: std::io::Result<()> = async {
            loop {
                let popped = tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    p = rx.recv() => p,
                };
                // Channel closed (detach) or sentinel: reader is done.
                let Some(Some(mut rep)) = popped else { break };
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    r = self.start_response(writer, &mut rep) => r?,
                }
                if self.status.get() != ConnectionStatus::KeepOpen {
                    break;
                }
            }
            Ok(())
        }
        .await;
        if result.is_err() {
            self.server.stats().inc_respond_errors();
        }
        if self.status.get() != ConnectionStatus::Detach {
            let _ = writer.shutdown().await;
        }
    }

    /// Stamp the mandatory headers and put one reply on the wire.
    async fn start_response(
        &self,
        writer: &mut BufWriter<WriteHalf<'_>>,
        rep: &mut Reply,
    ) -> std::io::Result<()> {
        rep.headers.set("Server", SERVER_NAME);
        rep.headers.set("Date", self.server.date());
        rep.headers
            .set("Content-Length", rep.content.len().to_string());
        let head = rep.serialize_head();
        writer.write_all(&head).await?;
        writer.write_all(&rep.content).await?;
        writer.flush().await
    }
}

async fn read_one(
    reader: &mut BufReader<ReadHalf<'_>>,
    parser: &mut RequestParser,
) -> Result<Option<Request>, ReadError> {
    parser.init();
    loop {
        match parser.poll()? {
            ParseStatus::Complete(req) => return Ok(Some(req)),
            ParseStatus::NeedMore => {}
        }
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if parser.has_partial() {
                return Err(ParseError::UnexpectedEof.into());
            }
            return Ok(None);
        }
        let fed = available.len();
        parser.feed(available);
        reader.consume(fed);
    }
}
