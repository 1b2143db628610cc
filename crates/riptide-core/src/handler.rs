//! Handler capability traits.
//!
//! An HTTP handler is a single capability: serve one request and resolve
//! with the populated reply. WebSocket handlers come in two flavors: a
//! full-duplex entry point that owns the upgraded stream, and a managed
//! record of callbacks driven by a read loop.
//!
//! All futures here are shard-local — no `Send` bound, because a handler
//! never leaves the shard its connection was accepted on.

use crate::error::{HandlerError, WebsocketError};
use crate::reply::Reply;
use crate::request::Request;
use crate::websocket::{ConnectedWebsocket, Opcode, WsMessage};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

/// A boxed future pinned to the current shard.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// An HTTP request handler.
///
/// `path` is the matched path (URL without query). The handler receives the
/// request and a reply pre-populated with the request's HTTP version, and
/// must resolve with a reply (usually the one it was given). The server
/// overwrites `Content-Length` from the final body length, so handlers
/// never set framing headers themselves.
pub trait Handler {
    /// Serve one request.
    fn handle(
        &self,
        path: &str,
        req: Request,
        rep: Reply,
    ) -> LocalBoxFuture<'_, Result<Reply, HandlerError>>;
}

/// Adapts a closure into a [`Handler`].
pub struct FunctionHandler<F> {
    f: F,
}

impl<F, Fut> FunctionHandler<F>
where
    F: Fn(Request, Reply) -> Fut,
    Fut: Future<Output = Result<Reply, HandlerError>> + 'static,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Handler for FunctionHandler<F>
where
    F: Fn(Request, Reply) -> Fut,
    Fut: Future<Output = Result<Reply, HandlerError>> + 'static,
{
    fn handle(
        &self,
        _path: &str,
        req: Request,
        rep: Reply,
    ) -> LocalBoxFuture<'_, Result<Reply, HandlerError>> {
        Box::pin((self.f)(req, rep))
    }
}

/// A WebSocket session handler.
///
/// Invoked after the connection has detached: the 101 reply is already on
/// the wire and `ws` owns the transport for full-duplex message exchange.
pub trait WsHandler {
    /// Run the session to completion.
    fn handle(
        &self,
        req: Request,
        ws: ConnectedWebsocket,
    ) -> LocalBoxFuture<'_, Result<(), WebsocketError>>;
}

/// Adapts a closure into a [`WsHandler`] with full control of the stream.
pub struct WsFunctionHandler<F> {
    f: F,
}

impl<F, Fut> WsFunctionHandler<F>
where
    F: Fn(Request, ConnectedWebsocket) -> Fut,
    Fut: Future<Output = Result<(), WebsocketError>> + 'static,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> WsHandler for WsFunctionHandler<F>
where
    F: Fn(Request, ConnectedWebsocket) -> Fut,
    Fut: Future<Output = Result<(), WebsocketError>> + 'static,
{
    fn handle(
        &self,
        req: Request,
        ws: ConnectedWebsocket,
    ) -> LocalBoxFuture<'_, Result<(), WebsocketError>> {
        Box::pin((self.f)(req, ws))
    }
}

/// Outbound message queue handed to managed-handler callbacks.
///
/// Callbacks are synchronous; messages they queue are flushed to the peer
/// by the managed read loop as soon as the callback returns.
#[derive(Debug, Default)]
pub struct WsSink {
    pending: VecDeque<WsMessage>,
}

impl WsSink {
    fn new() -> Self {
        Self::default()
    }

    /// Queue a text message.
    pub fn send_text(&mut self, text: impl Into<String>) {
        self.pending
            .push_back(WsMessage::new(Opcode::Text, text.into().into_bytes()));
    }

    /// Queue a binary message.
    pub fn send_binary(&mut self, payload: impl Into<Vec<u8>>) {
        self.pending
            .push_back(WsMessage::new(Opcode::Binary, payload.into()));
    }

    /// Queue an arbitrary message.
    pub fn send(&mut self, msg: WsMessage) {
        self.pending.push_back(msg);
    }

    async fn flush(&mut self, ws: &mut ConnectedWebsocket) -> Result<(), WebsocketError> {
        while let Some(msg) = self.pending.pop_front() {
            ws.write_message(&msg).await?;
        }
        Ok(())
    }
}

type SessionCallback = Box<dyn Fn(&Request, &mut WsSink)>;
type MessageCallback = Box<dyn Fn(&Request, &mut WsSink, WsMessage)>;

/// A managed WebSocket handler: a record of callbacks driven by a read
/// loop.
///
/// The loop invokes `on_connection` once, then `on_message` for every text
/// or binary message. PING frames are answered with PONG automatically;
/// a CLOSE frame (or clean EOF) ends the loop and invokes
/// `on_disconnection`.
#[derive(Default)]
pub struct WsCallbackHandler {
    on_connection: Option<SessionCallback>,
    on_message: Option<MessageCallback>,
    on_disconnection: Option<SessionCallback>,
}

impl WsCallbackHandler {
    /// A handler with no callbacks set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked once, right after the session starts.
    #[must_use]
    pub fn on_connection(mut self, f: impl Fn(&Request, &mut WsSink) + 'static) -> Self {
        self.on_connection = Some(Box::new(f));
        self
    }

    /// Invoked for every inbound text or binary message.
    #[must_use]
    pub fn on_message(mut self, f: impl Fn(&Request, &mut WsSink, WsMessage) + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Invoked once when the session ends, including on error.
    #[must_use]
    pub fn on_disconnection(mut self, f: impl Fn(&Request, &mut WsSink) + 'static) -> Self {
        self.on_disconnection = Some(Box::new(f));
        self
    }
}

impl WsHandler for WsCallbackHandler {
    fn handle(
        &self,
        req: Request,
        mut ws: ConnectedWebsocket,
    ) -> LocalBoxFuture<'_, Result<(), WebsocketError>> {
        Box::pin(async move {
            let mut sink = WsSink::new();
            if let Some(cb) = &self.on_connection {
                cb(&req, &mut sink);
                sink.flush(&mut ws).await?;
            }
            let result = loop {
                let msg = match ws.read_message().await {
                    Ok(msg) => msg,
                    Err(err) => break Err(err),
                };
                if msg.is_close() {
                    break Ok(());
                }
                match msg.opcode {
                    Opcode::Ping => {
                        let pong = WsMessage::new(Opcode::Pong, msg.payload);
                        if let Err(err) = ws.write_message(&pong).await {
                            break Err(err);
                        }
                    }
                    Opcode::Pong => {}
                    _ => {
                        if let Some(cb) = &self.on_message {
                            cb(&req, &mut sink, msg);
                            if let Err(err) = sink.flush(&mut ws).await {
                                break Err(err);
                            }
                        }
                    }
                }
            };
            if let Some(cb) = &self.on_disconnection {
                cb(&req, &mut sink);
                // The peer may already be gone; the session outcome is
                // whatever the read loop produced.
                let _ = sink.flush(&mut ws).await;
            }
            result
        })
    }
}
