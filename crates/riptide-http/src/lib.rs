//! Shard-parallel HTTP/1.x server with WebSocket upgrade.
//!
//! The server replicates one [`HttpServer`] per shard — an OS thread with
//! a single-threaded runtime — behind a [`ServerControl`] that fans
//! configuration out by message. Each accepted connection runs a duplex
//! state machine (reader + responder over a bounded reply queue) that can
//! keep the connection open, close it, or detach it to a WebSocket
//! handler looked up in the shared route table.
//!
//! ```ignore
//! use riptide_core::{FunctionHandler, Method, RouteTable};
//! use riptide_http::ServerControl;
//!
//! let control = ServerControl::start("httpd", 4)?;
//! control.set_routes(|r: &mut RouteTable| {
//!     r.add(Method::Get, "/", FunctionHandler::new(|_req, mut rep| async move {
//!         rep.set_body("hello");
//!         Ok(rep)
//!     }))?;
//!     Ok(())
//! }).await?;
//! let addr = control.listen("0.0.0.0:10000".parse()?).await?;
//! ```

#![deny(unsafe_code)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

pub mod connection;
pub mod control;
pub mod date;
pub mod parser;
pub mod query;
pub mod server;
pub mod stats;

pub use connection::{Connection, ConnectionStatus, REPLY_QUEUE_DEPTH, SERVER_NAME};
pub use control::{ControlError, ServerControl};
pub use date::{format_http_date, http_date_now};
pub use parser::{ParseError, ParseLimits, ParseStatus, RequestParser};
pub use query::split_query;
pub use server::{bind_listener, HttpServer, RouteBuilder};
pub use stats::{ServerStats, StatsSnapshot};
