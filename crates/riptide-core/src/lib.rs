//! Core types for the riptide HTTP/WebSocket server.
//!
//! This crate holds everything the connection machinery and user handlers
//! share: the request/reply data model, the route table, the handler
//! capability traits, and the WebSocket frame codec. All handler futures
//! are shard-local (no `Send` bound) — the server runs one single-threaded
//! executor per shard and never moves a connection between shards.

#![deny(unsafe_code)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod handler;
pub mod reply;
pub mod request;
pub mod routing;
pub mod uri;
pub mod websocket;

pub use error::{HandlerError, RouteError, WebsocketError};
pub use handler::{
    FunctionHandler, Handler, LocalBoxFuture, WsCallbackHandler, WsFunctionHandler, WsHandler,
    WsSink,
};
pub use reply::{Reply, StatusCode};
pub use request::{HeaderMap, Method, Request};
pub use routing::{PathPattern, RouteTable, Segment};
pub use uri::url_decode;
pub use websocket::{websocket_accept_key, ConnectedWebsocket, Opcode, WsMessage};
