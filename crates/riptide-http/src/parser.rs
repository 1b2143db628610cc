//! Incremental HTTP/1.x request parser.
//!
//! The parser owns a byte buffer fed from the connection's read stream.
//! `init()` starts a fresh request (retaining any bytes already received
//! past the previous one — pipelined requests and early WebSocket frames
//! both land there), `feed()` appends input, and `poll()` attempts to
//! produce a complete [`Request`]. Bytes past the parsed request stay in
//! the buffer and can be reclaimed with `take_leftover()` when the
//! connection detaches.

use riptide_core::{HeaderMap, Method, Request};
use thiserror::Error;

/// HTTP parsing error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed request line.
    #[error("invalid request line")]
    InvalidRequestLine,
    /// Unrecognized HTTP method.
    #[error("invalid HTTP method")]
    InvalidMethod,
    /// Malformed header line.
    #[error("invalid header")]
    InvalidHeader,
    /// Request line exceeds the configured limit.
    #[error("request line too long")]
    RequestLineTooLong,
    /// More headers than the configured limit.
    #[error("too many headers")]
    TooManyHeaders,
    /// Header block exceeds the configured limit.
    #[error("headers too large")]
    HeadersTooLarge,
    /// `Content-Length` is not a valid integer.
    #[error("invalid content-length")]
    InvalidContentLength,
    /// Body exceeds the configured limit.
    #[error("body too large")]
    BodyTooLarge,
    /// `Transfer-Encoding` is not supported.
    #[error("unsupported transfer-encoding")]
    UnsupportedTransferEncoding,
    /// Connection closed in the middle of a request.
    #[error("unexpected eof mid-request")]
    UnexpectedEof,
}

/// Parsing limits.
#[derive(Debug, Clone)]
pub struct ParseLimits {
    /// Maximum request line length in bytes.
    pub max_request_line_len: usize,
    /// Maximum number of headers.
    pub max_header_count: usize,
    /// Maximum header block size, terminator included.
    pub max_headers_size: usize,
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_request_line_len: 8 * 1024,
            max_header_count: 100,
            max_headers_size: 64 * 1024,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Outcome of a parse attempt.
#[derive(Debug)]
pub enum ParseStatus {
    /// A full request was parsed; trailing bytes remain buffered.
    Complete(Request),
    /// More input is needed.
    NeedMore,
}

/// Stateful request parser with an internal buffer.
#[derive(Debug, Default)]
pub struct RequestParser {
    buf: Vec<u8>,
    pos: usize,
    limits: ParseLimits,
}

impl RequestParser {
    /// A parser with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the parse limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ParseLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Start a new request: discard the bytes consumed by the previous one.
    pub fn init(&mut self) {
        self.buf.drain(..self.pos);
        self.pos = 0;
    }

    /// Append raw input.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True when bytes of an unfinished request are buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// Bytes received past the last parsed request.
    #[must_use]
    pub fn leftover(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Take the bytes received past the last parsed request.
    #[must_use]
    pub fn take_leftover(&mut self) -> Vec<u8> {
        let out = self.buf.split_off(self.pos);
        self.buf.clear();
        self.pos = 0;
        out
    }

    /// Attempt to parse one complete request from the buffered input.
    ///
    /// # Errors
    ///
    /// Any [`ParseError`]; the connection closes on error.
    pub fn poll(&mut self) -> Result<ParseStatus, ParseError> {
        let window = &self.buf[self.pos..];

        let Some(head_len) = find_head_end(window) else {
            // Not a full head yet; reject early when limits are blown.
            if !window.is_empty() {
                let line_end = find_crlf(window).unwrap_or(window.len());
                if line_end > self.limits.max_request_line_len {
                    return Err(ParseError::RequestLineTooLong);
                }
            }
            if window.len() > self.limits.max_headers_size {
                return Err(ParseError::HeadersTooLarge);
            }
            return Ok(ParseStatus::NeedMore);
        };

        let head = &window[..head_len];
        let line_end = find_crlf(head).ok_or(ParseError::InvalidRequestLine)?;
        if line_end > self.limits.max_request_line_len {
            return Err(ParseError::RequestLineTooLong);
        }
        let (method, url, version) = parse_request_line(&head[..line_end])?;
        let headers = parse_headers(&head[line_end + 2..], &self.limits)?;

        if headers.get("Transfer-Encoding").is_some() {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        let body_len = match headers.get("Content-Length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?,
            None => 0,
        };
        if body_len > self.limits.max_body_size {
            return Err(ParseError::BodyTooLarge);
        }
        if window.len() < head_len + body_len {
            return Ok(ParseStatus::NeedMore);
        }
        let body = window[head_len..head_len + body_len].to_vec();

        self.pos += head_len + body_len;
        Ok(ParseStatus::Complete(Request {
            method,
            url,
            path: String::new(),
            version,
            headers,
            query_parameters: Default::default(),
            path_parameters: Default::default(),
            body,
        }))
    }
}

/// Offset just past the `\r\n\r\n` head terminator, if present.
fn find_head_end(window: &[u8]) -> Option<usize> {
    window
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn find_crlf(window: &[u8]) -> Option<usize> {
    window.windows(2).position(|w| w == b"\r\n")
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, String), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequestLine)?;
    let mut parts = line.splitn(3, ' ');
    let method_token = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let method =
        Method::from_bytes(method_token.as_bytes()).ok_or(ParseError::InvalidMethod)?;
    let url = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    if url.is_empty() {
        return Err(ParseError::InvalidRequestLine);
    }
    let version = match parts.next() {
        // HTTP/0.9 simple request: no version token at all.
        None => "0.9".to_string(),
        Some(token) => token
            .strip_prefix("HTTP/")
            .ok_or(ParseError::InvalidRequestLine)?
            .to_string(),
    };
    Ok((method, url.to_string(), version))
}

fn parse_headers(block: &[u8], limits: &ParseLimits) -> Result<HeaderMap, ParseError> {
    if block.len() > limits.max_headers_size {
        return Err(ParseError::HeadersTooLarge);
    }
    let mut headers = HeaderMap::new();
    let mut rest = block;
    let mut count = 0usize;
    loop {
        let Some(line_end) = find_crlf(rest) else {
            break;
        };
        let line = &rest[..line_end];
        rest = &rest[line_end + 2..];
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > limits.max_header_count {
            return Err(ParseError::TooManyHeaders);
        }
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidHeader)?;
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let name = name.trim();
        if name.is_empty() || name.contains(' ') {
            return Err(ParseError::InvalidHeader);
        }
        // Single value per name, last one wins.
        headers.set(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> Result<ParseStatus, ParseError> {
        let mut parser = RequestParser::new();
        parser.init();
        parser.feed(input);
        parser.poll()
    }

    fn expect_complete(input: &[u8]) -> Request {
        match parse_one(input).unwrap() {
            ParseStatus::Complete(req) => req,
            ParseStatus::NeedMore => panic!("expected a complete request"),
        }
    }

    #[test]
    fn parses_simple_get() {
        let req = expect_complete(b"GET /hello?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url, "/hello?x=1");
        assert_eq!(req.version, "1.1");
        assert_eq!(req.headers.get("host"), Some("example.com"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn parses_request_with_zero_headers() {
        let req = expect_complete(b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(req.version, "1.0");
        assert!(req.headers.is_empty());
    }

    #[test]
    fn header_value_may_contain_colon() {
        let req = expect_complete(b"GET / HTTP/1.1\r\nReferer: http://a/b\r\n\r\n");
        assert_eq!(req.headers.get("Referer"), Some("http://a/b"));
    }

    #[test]
    fn duplicate_header_last_value_wins() {
        let req = expect_complete(b"GET / HTTP/1.1\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n");
        assert_eq!(req.headers.get("x-tag"), Some("two"));
    }

    #[test]
    fn simple_request_is_http_09() {
        let req = expect_complete(b"GET /index\r\n\r\n");
        assert_eq!(req.version, "0.9");
    }

    #[test]
    fn reads_content_length_body() {
        let req = expect_complete(b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn waits_for_full_body() {
        let mut parser = RequestParser::new();
        parser.init();
        parser.feed(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::NeedMore));
        parser.feed(b"llo");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::Complete(_)));
    }

    #[test]
    fn incremental_feed_byte_by_byte() {
        let raw = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut parser = RequestParser::new();
        parser.init();
        for (idx, byte) in raw.iter().enumerate() {
            parser.feed(std::slice::from_ref(byte));
            let status = parser.poll().unwrap();
            if idx + 1 < raw.len() {
                assert!(matches!(status, ParseStatus::NeedMore));
            } else {
                assert!(matches!(status, ParseStatus::Complete(_)));
            }
        }
    }

    #[test]
    fn pipelined_requests_parse_in_sequence() {
        let mut parser = RequestParser::new();
        parser.init();
        parser.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        let ParseStatus::Complete(first) = parser.poll().unwrap() else {
            panic!("first request should parse");
        };
        assert_eq!(first.url, "/a");
        assert!(parser.has_partial());

        parser.init();
        let ParseStatus::Complete(second) = parser.poll().unwrap() else {
            panic!("second request should parse");
        };
        assert_eq!(second.url, "/b");
        assert!(!parser.has_partial());
    }

    #[test]
    fn leftover_survives_for_detach() {
        let mut parser = RequestParser::new();
        parser.init();
        parser.feed(b"GET /ws HTTP/1.1\r\n\r\n\x81\x85abcd");
        let ParseStatus::Complete(_) = parser.poll().unwrap() else {
            panic!("request should parse");
        };
        assert_eq!(parser.leftover(), b"\x81\x85abcd");
        assert_eq!(parser.take_leftover(), b"\x81\x85abcd");
        assert!(!parser.has_partial());
    }

    #[test]
    fn rejects_unknown_method() {
        assert_eq!(
            parse_one(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::InvalidMethod
        );
    }

    #[test]
    fn rejects_header_without_colon() {
        assert_eq!(
            parse_one(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n").unwrap_err(),
            ParseError::InvalidHeader
        );
    }

    #[test]
    fn rejects_bad_content_length() {
        assert_eq!(
            parse_one(b"GET / HTTP/1.1\r\nContent-Length: many\r\n\r\n").unwrap_err(),
            ParseError::InvalidContentLength
        );
    }

    #[test]
    fn rejects_transfer_encoding() {
        assert_eq!(
            parse_one(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap_err(),
            ParseError::UnsupportedTransferEncoding
        );
    }

    #[test]
    fn rejects_oversized_request_line() {
        let mut parser = RequestParser::new().with_limits(ParseLimits {
            max_request_line_len: 16,
            ..ParseLimits::default()
        });
        parser.init();
        parser.feed(b"GET /a-rather-long-path-name HTTP/1.1\r\n\r\n");
        assert_eq!(parser.poll().unwrap_err(), ParseError::RequestLineTooLong);
    }

    #[test]
    fn unknown_version_token_is_preserved() {
        let req = expect_complete(b"GET / HTTP/2.0\r\n\r\n");
        assert_eq!(req.version, "2.0");
    }
}
