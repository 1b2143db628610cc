//! Error types shared across the server.

use thiserror::Error;

/// Route registration failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// An identical (method, pattern) pair is already registered.
    #[error("duplicate route: {method} {pattern}")]
    DuplicateRoute {
        /// Method of the conflicting registration.
        method: &'static str,
        /// Pattern of the conflicting registration.
        pattern: String,
    },
    /// The pattern could not be compiled (e.g. a `*name` wildcard that is
    /// not the final segment).
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Failure reported by a user handler.
///
/// Caught per-request by the route table, which turns it into a 500 reply
/// whose body is the error description.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Free-form handler failure.
    #[error("{0}")]
    Message(String),
    /// I/O failure inside a handler.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Any other error a handler wants to surface.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + 'static>),
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_string())
    }
}

/// WebSocket protocol or transport failure.
#[derive(Debug, Error)]
pub enum WebsocketError {
    /// I/O error on the underlying stream.
    #[error("websocket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Peer violated the framing protocol.
    #[error("websocket protocol error: {0}")]
    Protocol(&'static str),
    /// Invalid UTF-8 in a text frame.
    #[error("invalid utf-8 in websocket text frame: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_route_message() {
        let err = RouteError::DuplicateRoute {
            method: "GET",
            pattern: "/users/:id".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate route: GET /users/:id");
    }

    #[test]
    fn handler_error_from_string() {
        let err: HandlerError = "boom".into();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn websocket_error_wraps_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        let err = WebsocketError::from(io);
        assert!(err.to_string().contains("closed"));
    }
}
