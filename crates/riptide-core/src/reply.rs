//! HTTP reply construction and serialization.

use crate::request::HeaderMap;
use std::fmt;

/// HTTP response status code with its canonical reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 101 Switching Protocols.
    SwitchingProtocols,
    /// 200 OK.
    Ok,
    /// 201 Created.
    Created,
    /// 204 No Content.
    NoContent,
    /// 301 Moved Permanently.
    MovedPermanently,
    /// 302 Found.
    Found,
    /// 304 Not Modified.
    NotModified,
    /// 400 Bad Request.
    BadRequest,
    /// 401 Unauthorized.
    Unauthorized,
    /// 403 Forbidden.
    Forbidden,
    /// 404 Not Found.
    NotFound,
    /// 405 Method Not Allowed.
    MethodNotAllowed,
    /// 500 Internal Server Error.
    InternalServerError,
    /// 501 Not Implemented.
    NotImplemented,
    /// 502 Bad Gateway.
    BadGateway,
    /// 503 Service Unavailable.
    ServiceUnavailable,
}

impl StatusCode {
    /// Numeric status code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::SwitchingProtocols => 101,
            Self::Ok => 200,
            Self::Created => 201,
            Self::NoContent => 204,
            Self::MovedPermanently => 301,
            Self::Found => 302,
            Self::NotModified => 304,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
        }
    }

    /// Canonical reason phrase.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::NoContent => "No Content",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::NotModified => "Not Modified",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// A response being built.
///
/// Owned exclusively by the connection until pushed into the reply queue.
/// `done()` materializes the status line; the connection's responder stamps
/// the mandatory headers (`Server`, `Date`, `Content-Length`) immediately
/// before serialization, so those always reflect the final body and write
/// time regardless of what a handler set.
#[derive(Debug)]
pub struct Reply {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub content: Vec<u8>,
    version: String,
    response_line: String,
}

impl Reply {
    /// A fresh 200 reply with no headers or body.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: HeaderMap::new(),
            content: Vec::new(),
            version: "1.1".to_string(),
            response_line: String::new(),
        }
    }

    /// Set the status code.
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Copy the HTTP version token (e.g. `"1.1"`) from the request.
    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = version.into();
        self
    }

    /// HTTP version token this reply will be written with.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.content = body.into();
        self
    }

    /// Set the `Content-Type` header.
    pub fn set_content_type(&mut self, mime: &str) -> &mut Self {
        self.headers.set("Content-Type", mime.to_string());
        self
    }

    /// Commit the status line. Safe to call more than once; the last call
    /// wins (the version or status may have changed in between).
    pub fn done(&mut self) -> &mut Self {
        self.response_line = format!(
            "HTTP/{} {} {}\r\n",
            self.version,
            self.status.as_u16(),
            self.status.reason()
        );
        self
    }

    /// Whether the status line has been materialized.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !self.response_line.is_empty()
    }

    /// Serialize the status line, headers, and blank separator line.
    ///
    /// The body is written separately by the responder. Calls `done()`
    /// implicitly if the status line was never committed.
    #[must_use]
    pub fn serialize_head(&mut self) -> Vec<u8> {
        if !self.is_done() {
            self.done();
        }
        let mut out = Vec::with_capacity(self.response_line.len() + 32 * self.headers.len() + 2);
        out.extend_from_slice(self.response_line.as_bytes());
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_and_reasons() {
        assert_eq!(StatusCode::SwitchingProtocols.as_u16(), 101);
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!(StatusCode::BadRequest.reason(), "Bad Request");
        assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
        assert_eq!(
            StatusCode::InternalServerError.reason(),
            "Internal Server Error"
        );
    }

    #[test]
    fn done_materializes_response_line() {
        let mut rep = Reply::new();
        rep.set_version("1.0").set_status(StatusCode::NotFound);
        assert!(!rep.is_done());
        rep.done();
        assert!(rep.is_done());
        let head = rep.serialize_head();
        assert!(head.starts_with(b"HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn serialize_head_emits_headers_in_order() {
        let mut rep = Reply::new();
        rep.headers.set("Server", "riptide httpd");
        rep.headers.set("Content-Length", "5");
        let head = String::from_utf8(rep.serialize_head()).unwrap();
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nServer: riptide httpd\r\nContent-Length: 5\r\n\r\n"
        );
    }

    #[test]
    fn serialize_head_without_done_commits_line() {
        let mut rep = Reply::new();
        let head = rep.serialize_head();
        assert!(head.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(head.ends_with(b"\r\n\r\n"));
    }
}
