//! Route table: path matching, parameter binding, handler dispatch.
//!
//! Two sub-tables share one [`RouteTable`]: HTTP routes keyed by method and
//! compiled pattern, and WebSocket routes keyed by exact path. Matching is
//! deterministic: at most one route wins for any (method, path), decided by
//! segment-by-segment specificity (literal > `:name` > `*name`) with
//! registration order breaking ties.

use crate::error::{RouteError, WebsocketError};
use crate::handler::{Handler, WsHandler};
use crate::reply::{Reply, StatusCode};
use crate::request::{Method, Request};
use crate::uri::url_decode;
use crate::websocket::ConnectedWebsocket;
use std::collections::HashMap;
use std::rc::Rc;

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches the segment text exactly.
    Literal(String),
    /// `:name` — binds one segment to a named parameter (URL-decoded).
    Param(String),
    /// `*name` — terminal, binds the remaining path verbatim.
    Wildcard(String),
}

impl Segment {
    /// Specificity rank; lower is more specific.
    const fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 0,
            Self::Param(_) => 1,
            Self::Wildcard(_) => 2,
        }
    }
}

/// A pre-compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern string.
    ///
    /// # Errors
    ///
    /// Rejects a `*name` wildcard that is not the final segment, and
    /// parameter or wildcard segments with an empty name.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };
        let mut segments = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            if let Some(last) = segments.last() {
                if matches!(last, Segment::Wildcard(_)) {
                    return Err(invalid("wildcard must be the final segment"));
                }
            }
            if let Some(name) = raw.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("parameter segment needs a name"));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if let Some(name) = raw.strip_prefix('*') {
                if name.is_empty() {
                    return Err(invalid("wildcard segment needs a name"));
                }
                segments.push(Segment::Wildcard(name.to_string()));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }
        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// The original pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Match against a path, binding parameters.
    ///
    /// `:name` values are stored URL-decoded (a segment whose decoding
    /// fails makes the route not match); a `*name` wildcard binds the
    /// remaining path verbatim, embedded slashes included.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let ranges = segment_ranges(path);
        let last_end = ranges.last().map_or(0, |(_, end)| *end);
        let mut params = HashMap::new();
        let mut idx = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(expected) => {
                    let (start, end) = *ranges.get(idx)?;
                    if expected.as_str() != &path[start..end] {
                        return None;
                    }
                    idx += 1;
                }
                Segment::Param(name) => {
                    let (start, end) = *ranges.get(idx)?;
                    let value = url_decode(&path[start..end])?;
                    params.insert(name.clone(), value);
                    idx += 1;
                }
                Segment::Wildcard(name) => {
                    let (start, _) = *ranges.get(idx)?;
                    params.insert(name.clone(), path[start..last_end].to_string());
                    idx = ranges.len();
                }
            }
        }

        if idx != ranges.len() {
            return None;
        }
        Some(params)
    }

    /// Per-segment specificity vector, compared lexicographically.
    fn specificity(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }
}

/// Byte ranges of the non-empty `/`-separated segments of `path`.
fn segment_ranges(path: &str) -> Vec<(usize, usize)> {
    let bytes = path.as_bytes();
    let mut ranges = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        while idx < bytes.len() && bytes[idx] == b'/' {
            idx += 1;
        }
        if idx >= bytes.len() {
            break;
        }
        let start = idx;
        while idx < bytes.len() && bytes[idx] != b'/' {
            idx += 1;
        }
        ranges.push((start, idx));
    }
    ranges
}

struct HttpRoute {
    method: Method,
    pattern: PathPattern,
    handler: Rc<dyn Handler>,
}

/// The route table.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<HttpRoute>,
    ws_routes: HashMap<String, Rc<dyn WsHandler>>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes.len())
            .field("ws_routes", &self.ws_routes.len())
            .finish()
    }
}

impl RouteTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an HTTP route.
    ///
    /// # Errors
    ///
    /// `DuplicateRoute` if an identical (method, pattern) is already
    /// present; `InvalidPattern` if the pattern does not compile.
    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, RouteError> {
        let pattern = PathPattern::parse(pattern)?;
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.segments == pattern.segments)
        {
            return Err(RouteError::DuplicateRoute {
                method: method.as_str(),
                pattern: pattern.pattern,
            });
        }
        self.routes.push(HttpRoute {
            method,
            pattern,
            handler: Rc::new(handler),
        });
        Ok(self)
    }

    /// Register a WebSocket handler at an exact path, replacing any
    /// previous handler there.
    pub fn put(&mut self, path: &str, handler: impl WsHandler + 'static) -> &mut Self {
        self.ws_routes.insert(path.to_string(), Rc::new(handler));
        self
    }

    /// Find the best HTTP match for (method, path).
    ///
    /// Returns the handler and the bound parameters. Deterministic:
    /// most-specific-first, ties broken by registration order.
    #[must_use]
    pub fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(Rc<dyn Handler>, HashMap<String, String>)> {
        let mut best: Option<(Vec<u8>, &HttpRoute, HashMap<String, String>)> = None;
        for route in &self.routes {
            if route.method != method {
                continue;
            }
            let Some(params) = route.pattern.match_path(path) else {
                continue;
            };
            let rank = route.pattern.specificity();
            match &best {
                // Strict comparison keeps the earliest registration on ties.
                Some((best_rank, _, _)) if *best_rank <= rank => {}
                _ => best = Some((rank, route, params)),
            }
        }
        best.map(|(_, route, params)| (Rc::clone(&route.handler), params))
    }

    /// WebSocket handler lookup; does not invoke.
    #[must_use]
    pub fn get_ws_handler(&self, path: &str) -> Option<Rc<dyn WsHandler>> {
        self.ws_routes.get(path).cloned()
    }

    /// Dispatch one request: find the best match, bind path parameters,
    /// invoke the handler, return its completed reply.
    ///
    /// No match synthesizes a 404; a handler failure synthesizes a 500
    /// whose body is the error description (`text/plain`).
    pub async fn handle(&self, method: Method, path: &str, mut req: Request, rep: Reply) -> Reply {
        let Some((handler, params)) = self.lookup(method, path) else {
            return Self::error_reply(rep, StatusCode::NotFound, "Not found");
        };
        req.path_parameters = params;
        match handler.handle(path, req, rep).await {
            Ok(rep) => rep,
            Err(err) => {
                tracing::debug!(error = %err, path, "handler failed");
                Self::error_reply(Reply::new(), StatusCode::InternalServerError, &err.to_string())
            }
        }
    }

    /// Invoke the matched WebSocket handler; returns immediately when no
    /// handler is registered at `path` (the caller should already have
    /// refused the upgrade).
    pub async fn handle_ws(
        &self,
        path: &str,
        ws: ConnectedWebsocket,
        req: Request,
    ) -> Result<(), WebsocketError> {
        let Some(handler) = self.get_ws_handler(path) else {
            return Ok(());
        };
        handler.handle(req, ws).await
    }

    /// Registered HTTP route count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when no HTTP routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn error_reply(mut rep: Reply, status: StatusCode, body: &str) -> Reply {
        rep.set_status(status);
        rep.set_body(body.as_bytes().to_vec());
        rep.set_content_type("text/plain");
        rep
    }
}
