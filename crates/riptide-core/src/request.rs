//! HTTP request data model.

use std::collections::HashMap;
use std::fmt;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET method.
    Get,
    /// POST method.
    Post,
    /// PUT method.
    Put,
    /// DELETE method.
    Delete,
    /// PATCH method.
    Patch,
    /// OPTIONS method.
    Options,
    /// HEAD method.
    Head,
    /// TRACE method.
    Trace,
}

impl Method {
    /// Parse a method from its wire representation.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"PATCH" => Some(Self::Patch),
            b"OPTIONS" => Some(Self::Options),
            b"HEAD" => Some(Self::Head),
            b"TRACE" => Some(Self::Trace),
            _ => None,
        }
    }

    /// Canonical uppercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header collection with case-insensitive lookup.
///
/// Names keep the casing they were inserted with so replies serialize
/// exactly what the server (or a handler) wrote, while `get`/`set`/`remove`
/// all match ASCII case-insensitively. A single value per name: setting an
/// existing name replaces its value (last wins). Insertion order is
/// preserved for serialization.
#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any existing value under the same name.
    ///
    /// The stored name keeps the casing of the *first* insertion; only the
    /// value is replaced on subsequent sets.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a header by name (case-insensitive); returns the old value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    /// Check for a header by name (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed HTTP request.
///
/// Produced by the parser, routed through the route table (which fills in
/// `path_parameters`), consumed by exactly one handler, then dropped.
#[derive(Debug)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Raw request target as it appeared on the wire (may carry a query).
    pub url: String,
    /// URL without the query string; set before routing.
    pub path: String,
    /// HTTP version token, e.g. `"1.0"`, `"1.1"`, `"0.9"`.
    pub version: String,
    /// Header fields, case-insensitive, last value wins.
    pub headers: HeaderMap,
    /// Decoded query parameters.
    pub query_parameters: HashMap<String, String>,
    /// Parameters bound by the route matcher (`:name` / `*name`).
    pub path_parameters: HashMap<String, String>,
    /// Request body bytes.
    pub body: Vec<u8>,
}

impl Request {
    /// Convenience constructor used by tests and handlers.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            method,
            path: url.clone(),
            url,
            version: "1.1".to_string(),
            headers: HeaderMap::new(),
            query_parameters: HashMap::new(),
            path_parameters: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Header lookup shorthand.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Path parameter lookup shorthand.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_parameters.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_wire_names() {
        for m in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Patch,
            Method::Options,
            Method::Head,
            Method::Trace,
        ] {
            assert_eq!(Method::from_bytes(m.as_str().as_bytes()), Some(m));
        }
        assert_eq!(Method::from_bytes(b"BREW"), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("Content-type"));
        assert!(!headers.contains("Content-Length"));
    }

    #[test]
    fn header_set_replaces_value_keeps_first_casing() {
        let mut headers = HeaderMap::new();
        headers.set("Connection", "Keep-Alive");
        headers.set("connection", "Close");
        assert_eq!(headers.len(), 1);
        let (name, value) = headers.iter().next().unwrap();
        assert_eq!(name, "Connection");
        assert_eq!(value, "Close");
    }

    #[test]
    fn header_remove_returns_old_value() {
        let mut headers = HeaderMap::new();
        headers.set("Upgrade", "websocket");
        assert_eq!(headers.remove("UPGRADE").as_deref(), Some("websocket"));
        assert!(headers.is_empty());
        assert_eq!(headers.remove("Upgrade"), None);
    }

    #[test]
    fn header_iteration_preserves_insertion_order() {
        let mut headers = HeaderMap::new();
        headers.set("Server", "riptide httpd");
        headers.set("Date", "Thu, 01 Jan 1970 00:00:00 GMT");
        headers.set("Content-Length", "0");
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Server", "Date", "Content-Length"]);
    }

    #[test]
    fn request_param_shorthand() {
        let mut req = Request::new(Method::Get, "/file/a/b");
        req.path_parameters
            .insert("path".to_string(), "a/b".to_string());
        assert_eq!(req.param("path"), Some("a/b"));
        assert_eq!(req.param("missing"), None);
    }
}
