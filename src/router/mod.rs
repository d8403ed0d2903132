//! Path-template and regex-based request routing.
//!
//! The reference engine has no routing concept at all — its own examples hand-roll
//! `if req.url().matches(&[b"echo"])` chains. This module adds a `Vec<Route>`,
//! insertion-order, first-full-match-wins dispatcher in the same spirit as
//! `rouille`'s `Router { routes: Vec<Route> }`, but built on this crate's own
//! zero-copy `Url`/`Method` types instead of translating `rouille`'s long-obsolete
//! `hyper 0.x` macro DSL.

pub mod middleware;

use crate::{
    http::types::Url, limits::RouterOptions, ConnectionData, Handled, Handler, Method, Request,
    Response, StatusCode,
};
use middleware::{
    ErasedMiddleware, ErasedRouteHandler, Middleware, MiddlewareMode, RouteHandler, RouteParams,
};
use regex::Regex;
use std::{borrow::Cow, collections::HashSet, sync::Arc, sync::OnceLock};

/// Bitmask of HTTP methods a route accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodMask(u8);

impl MethodMask {
    pub const GET: Self = Self(1 << 0);
    pub const PUT: Self = Self(1 << 1);
    pub const POST: Self = Self(1 << 2);
    pub const HEAD: Self = Self(1 << 3);
    pub const PATCH: Self = Self(1 << 4);
    pub const DELETE: Self = Self(1 << 5);
    pub const OPTIONS: Self = Self(1 << 6);
    /// Accepts every method this crate supports.
    pub const ANY: Self = Self(0b0111_1111);

    const fn from_method(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Put => Self::PUT,
            Method::Post => Self::POST,
            Method::Head => Self::HEAD,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
            Method::Options => Self::OPTIONS,
        }
    }

    pub const fn contains(self, method: Method) -> bool {
        self.0 & Self::from_method(method).0 != 0
    }
}

impl std::ops::BitOr for MethodMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Error produced while building a [`RoutingTable`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RouteError {
    /// Two routes were registered with the same normalized path template and
    /// overlapping method masks, so dispatch between them would be ambiguous.
    #[error("route `{new}` collides with an already-registered route `{existing}`")]
    Collision { existing: String, new: String },
    /// A regex route's pattern failed to compile.
    #[error("invalid route pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(Vec<u8>),
    Param(String),
}

enum Pattern {
    /// The literal special path `/<<ANY>>`: matches every request path.
    CatchAll,
    Template(Vec<Segment>),
    Regex {
        source: String,
        compiled: OnceLock<Regex>,
        case_insensitive: bool,
    },
}

pub(crate) struct Route {
    template: String,
    pattern: Pattern,
    methods: MethodMask,
    pub(crate) handler_id: usize,
}

/// A successful route match: which route was selected and any path parameters
/// it captured.
///
/// Template-route captures borrow directly from the request's path segments
/// (zero-copy); regex-route captures are joined from multiple segments first,
/// so they own their bytes.
pub(crate) struct RouteMatch<'req> {
    pub(crate) handler_id: usize,
    pub(crate) params: Vec<(String, Cow<'req, [u8]>)>,
    /// Set when this match came from `HEAD` falling back onto a `GET`-only
    /// route (`RouterOptions::implicit_head`), not an explicitly registered
    /// `HEAD` route. The caller discards the response body in that case.
    pub(crate) via_implicit_head: bool,
}

pub(crate) enum Dispatch<'req> {
    Full(RouteMatch<'req>),
    /// Implicit `OPTIONS` support: the path matched but no registered route
    /// declared `OPTIONS` explicitly.
    Options,
    /// Redirect to the same path with/without a trailing slash.
    TrailingSlashRedirect(Vec<u8>),
    MethodNotAllowed,
    NotFound,
}

/// Ordered collection of registered [`Route`]s plus the dispatch algorithm.
///
/// Routes are tried in insertion order; the first route whose path template
/// matches AND whose method mask contains the request's method wins.
pub struct RoutingTable {
    routes: Vec<Route>,
    options: RouterOptions,
}

impl RoutingTable {
    pub fn new(options: RouterOptions) -> Self {
        Self {
            routes: Vec::new(),
            options,
        }
    }

    pub(crate) fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Registers a literal/parameterized path template (e.g. `/users/<id>/items`)
    /// for the given methods, mapped to `handler_id` (an index into the
    /// embedder's own handler table).
    pub fn add_route(
        &mut self,
        template: &str,
        methods: MethodMask,
        handler_id: usize,
    ) -> Result<(), RouteError> {
        let pattern = if template == "/<<ANY>>" {
            Pattern::CatchAll
        } else {
            Pattern::Template(parse_template(template))
        };

        self.insert(template, pattern, methods, handler_id)
    }

    /// Registers a regular-expression route. The pattern is compiled lazily, on
    /// first match attempt, not at registration time.
    pub fn add_regex_route(
        &mut self,
        pattern: &str,
        methods: MethodMask,
        handler_id: usize,
    ) -> Result<(), RouteError> {
        // Validate eagerly so registration-time mistakes surface immediately;
        // the *compiled* `Regex` itself is still built lazily on first match.
        Regex::new(pattern).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let route_pattern = Pattern::Regex {
            source: pattern.to_string(),
            compiled: OnceLock::new(),
            case_insensitive: self.options.match_routes_ignore_case,
        };

        self.insert(pattern, route_pattern, methods, handler_id)
    }

    fn insert(
        &mut self,
        template: &str,
        pattern: Pattern,
        methods: MethodMask,
        handler_id: usize,
    ) -> Result<(), RouteError> {
        let new_key = collision_key(&pattern);
        for existing in &self.routes {
            if collision_key(&existing.pattern) == new_key && (existing.methods.0 & methods.0) != 0
            {
                return Err(RouteError::Collision {
                    existing: existing.template.clone(),
                    new: template.to_string(),
                });
            }
        }

        self.routes.push(Route {
            template: template.to_string(),
            pattern,
            methods,
            handler_id,
        });

        Ok(())
    }

    /// Runs the matching-order algorithm (spec §4.8) against `request`.
    pub(crate) fn dispatch<'req>(&self, request: &'req Request) -> Dispatch<'req> {
        let method = request.method();
        let segments = request.url().path_segments();

        let mut path_matched = false;

        for route in &self.routes {
            let Some(params) = self.match_route(route, segments) else {
                continue;
            };

            path_matched = true;

            if route.methods.contains(method) {
                return Dispatch::Full(RouteMatch {
                    handler_id: route.handler_id,
                    params,
                    via_implicit_head: false,
                });
            }
        }

        if method == Method::Head && self.options.implicit_head {
            for route in &self.routes {
                let Some(params) = self.match_route(route, segments) else {
                    continue;
                };
                if route.methods.contains(Method::Get) {
                    return Dispatch::Full(RouteMatch {
                        handler_id: route.handler_id,
                        params,
                        via_implicit_head: true,
                    });
                }
            }
        }

        if path_matched {
            if method == Method::Options {
                return Dispatch::Options;
            }
            return Dispatch::MethodNotAllowed;
        }

        if self.options.force_trailing_slash {
            if let Some(target) = self.trailing_slash_alternative(request.url(), method) {
                return Dispatch::TrailingSlashRedirect(target);
            }
        }

        Dispatch::NotFound
    }

    fn match_route<'req>(
        &self,
        route: &Route,
        segments: &[&'req [u8]],
    ) -> Option<Vec<(String, Cow<'req, [u8]>)>> {
        match &route.pattern {
            Pattern::CatchAll => Some(Vec::new()),
            Pattern::Template(template) => {
                match_template(template, segments, self.options.match_routes_ignore_case)
            }
            Pattern::Regex {
                compiled,
                source,
                case_insensitive,
            } => {
                let re = compiled.get_or_init(|| {
                    let pattern = if *case_insensitive {
                        format!("(?i){source}")
                    } else {
                        source.clone()
                    };
                    Regex::new(&pattern).expect("validated at registration time")
                });

                // Path segments are rejoined with `/` for matching against a
                // regex anchored on the full path, not per segment.
                let mut joined = Vec::new();
                for (i, seg) in segments.iter().enumerate() {
                    if i > 0 {
                        joined.push(b'/');
                    }
                    joined.extend_from_slice(seg);
                }
                let text = std::str::from_utf8(&joined).ok()?;
                let captures = re.captures(text)?;

                let mut params = Vec::new();
                for name in re.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        params.push((name.to_string(), Cow::Owned(m.as_str().as_bytes().to_vec())));
                    }
                }
                Some(params)
            }
        }
    }

    fn trailing_slash_alternative(&self, url: &Url, method: Method) -> Option<Vec<u8>> {
        let segments = url.path_segments();
        if method != Method::Get {
            return None;
        }

        // A request path with no trailing slash never produces a trailing empty
        // segment (the parser drops empty segments), so the only distinguishing
        // signal left is whether some *other* registered template ends in `/`
        // while this path, rejoined, matches it once a slash is appended.
        for route in &self.routes {
            let Pattern::Template(template) = &route.pattern else {
                continue;
            };
            if !route.methods.contains(Method::Get) {
                continue;
            }
            if template.len() != segments.len() {
                continue;
            }
            if match_template(template, segments, self.options.match_routes_ignore_case).is_some()
                && route.template.ends_with('/')
            {
                let mut target = url.path().to_vec();
                target.push(b'/');
                if let Some(query) = url.query_full() {
                    target.extend_from_slice(query);
                }
                return Some(target);
            }
        }

        None
    }
}

/// Combines a [`RoutingTable`] with the registered route handlers and the
/// before/after middleware pipeline, and dispatches requests by implementing
/// [`Handler`] — pass it straight to [`ServerBuilder::handler`](crate::ServerBuilder::handler).
pub struct Router<S = ()>
where
    S: ConnectionData,
{
    table: RoutingTable,
    handlers: Vec<Arc<dyn ErasedRouteHandler<S>>>,
    route_middlewares: Vec<Vec<Arc<dyn ErasedMiddleware<S>>>>,
    bypass_global: Vec<HashSet<usize>>,
    global_middlewares: Vec<Arc<dyn ErasedMiddleware<S>>>,
    not_found: Option<Arc<dyn ErasedRouteHandler<S>>>,
    method_not_allowed: Option<Arc<dyn ErasedRouteHandler<S>>>,
}

impl<S> Router<S>
where
    S: ConnectionData,
{
    pub fn new(options: RouterOptions) -> Self {
        Self {
            table: RoutingTable::new(options),
            handlers: Vec::new(),
            route_middlewares: Vec::new(),
            bypass_global: Vec::new(),
            global_middlewares: Vec::new(),
            not_found: None,
            method_not_allowed: None,
        }
    }

    /// Registers a path-template route bound to `handler`.
    pub fn route<H: RouteHandler<S>>(
        &mut self,
        template: &str,
        methods: MethodMask,
        handler: H,
    ) -> Result<(), RouteError> {
        let handler_id = self.handlers.len();
        self.table.add_route(template, methods, handler_id)?;
        self.handlers.push(Arc::new(handler));
        self.route_middlewares.push(Vec::new());
        self.bypass_global.push(HashSet::new());
        Ok(())
    }

    /// Registers a regex route bound to `handler`.
    pub fn regex_route<H: RouteHandler<S>>(
        &mut self,
        pattern: &str,
        methods: MethodMask,
        handler: H,
    ) -> Result<(), RouteError> {
        let handler_id = self.handlers.len();
        self.table.add_regex_route(pattern, methods, handler_id)?;
        self.handlers.push(Arc::new(handler));
        self.route_middlewares.push(Vec::new());
        self.bypass_global.push(HashSet::new());
        Ok(())
    }

    /// Attaches `middleware` to the most recently registered route.
    ///
    /// # Panics
    ///
    /// Panics if no route has been registered yet.
    pub fn route_middleware<M: Middleware<S>>(&mut self, middleware: M) -> &mut Self {
        self.route_middlewares
            .last_mut()
            .expect("route_middleware called before any route was registered")
            .push(Arc::new(middleware));
        self
    }

    /// Excludes the most recently registered route from a global middleware
    /// registered at `global_index` (the position returned by
    /// [`global_middleware`](Self::global_middleware)).
    ///
    /// # Panics
    ///
    /// Panics if no route has been registered yet.
    pub fn bypass_global(&mut self, global_index: usize) -> &mut Self {
        self.bypass_global
            .last_mut()
            .expect("bypass_global called before any route was registered")
            .insert(global_index);
        self
    }

    /// Registers a middleware that wraps every route. Returns its index, for
    /// use with [`bypass_global`](Self::bypass_global).
    pub fn global_middleware<M: Middleware<S>>(&mut self, middleware: M) -> usize {
        let index = self.global_middlewares.len();
        self.global_middlewares.push(Arc::new(middleware));
        index
    }

    /// Overrides the default `404 Not Found` response.
    pub fn not_found_handler<H: RouteHandler<S>>(&mut self, handler: H) -> &mut Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    /// Overrides the default `405 Method Not Allowed` response.
    pub fn method_not_allowed_handler<H: RouteHandler<S>>(&mut self, handler: H) -> &mut Self {
        self.method_not_allowed = Some(Arc::new(handler));
        self
    }

    async fn run_pipeline(
        &self,
        handler_id: usize,
        data: &mut S,
        request: &Request,
        params: &RouteParams<'_>,
        response: &mut Response,
    ) -> Handled {
        let bypass = &self.bypass_global[handler_id];

        for (index, mw) in self.global_middlewares.iter().enumerate() {
            if mw.mode() == MiddlewareMode::BeforeResponse
                && !bypass.contains(&index)
            {
                if let Some(handled) = mw.call(data, request, params, response).await {
                    return handled;
                }
            }
        }

        for mw in &self.route_middlewares[handler_id] {
            if mw.mode() == MiddlewareMode::BeforeResponse {
                if let Some(handled) = mw.call(data, request, params, response).await {
                    return handled;
                }
            }
        }

        let handled = self.handlers[handler_id]
            .call(data, request, params, response)
            .await;

        for (index, mw) in self.global_middlewares.iter().enumerate() {
            if mw.mode() == MiddlewareMode::AfterResponse && !bypass.contains(&index) {
                if let Some(short_circuit) = mw.call(data, request, params, response).await {
                    return short_circuit;
                }
            }
        }

        for mw in &self.route_middlewares[handler_id] {
            if mw.mode() == MiddlewareMode::AfterResponse {
                if let Some(short_circuit) = mw.call(data, request, params, response).await {
                    return short_circuit;
                }
            }
        }

        handled
    }
}

impl<S> Handler<S> for Router<S>
where
    S: ConnectionData,
{
    fn catches_panics(&self) -> bool {
        !self.table.options().throw_exceptions
    }

    async fn handle(&self, data: &mut S, request: &Request, response: &mut Response) -> Handled {
        match self.table.dispatch(request) {
            Dispatch::Full(route_match) => {
                let via_implicit_head = route_match.via_implicit_head;
                let params = RouteParams::new(route_match.params);
                let handled = self
                    .run_pipeline(route_match.handler_id, data, request, &params, response)
                    .await;
                if via_implicit_head {
                    response.truncate_body();
                }
                handled
            }
            Dispatch::Options => response.status(StatusCode::Ok).body(""),
            Dispatch::TrailingSlashRedirect(target) => response
                .status(StatusCode::TemporaryRedirect)
                .header("location", target)
                .body(""),
            Dispatch::MethodNotAllowed => match &self.method_not_allowed {
                Some(handler) => {
                    let params = RouteParams::new(Vec::new());
                    handler.call(data, request, &params, response).await
                }
                None => response.status(StatusCode::MethodNotAllowed).body(""),
            },
            Dispatch::NotFound => match &self.not_found {
                Some(handler) => {
                    let params = RouteParams::new(Vec::new());
                    handler.call(data, request, &params, response).await
                }
                None => response.status(StatusCode::NotFound).body(""),
            },
        }
    }
}

/// A comparison key used to detect registration-time route collisions.
///
/// Template routes erase parameter *names* (`<id>` and `<name>` both collapse
/// to the same placeholder) since two templates that differ only in what they
/// call a parameter still shadow each other at dispatch time; literal segments
/// and regex source strings still compare verbatim.
fn collision_key(pattern: &Pattern) -> String {
    match pattern {
        Pattern::CatchAll => "<<ANY>>".to_string(),
        Pattern::Template(segments) => segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(lit) => format!("={}", String::from_utf8_lossy(lit)),
                Segment::Param(_) => "<>".to_string(),
            })
            .collect::<Vec<_>>()
            .join("/"),
        Pattern::Regex { source, .. } => format!("~{source}"),
    }
}

fn parse_template(template: &str) -> Vec<Segment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if segment.starts_with('<') && segment.ends_with('>') && segment.len() > 2 {
                Segment::Param(segment[1..segment.len() - 1].to_string())
            } else {
                Segment::Literal(segment.as_bytes().to_vec())
            }
        })
        .collect()
}

fn match_template<'req>(
    template: &[Segment],
    segments: &[&'req [u8]],
    ignore_case: bool,
) -> Option<Vec<(String, Cow<'req, [u8]>)>> {
    if template.len() != segments.len() {
        return None;
    }

    let mut params = Vec::new();

    for (seg, value) in template.iter().zip(segments.iter()) {
        match seg {
            Segment::Literal(lit) => {
                let matches = if ignore_case {
                    lit.eq_ignore_ascii_case(value)
                } else {
                    lit.as_slice() == *value
                };
                if !matches {
                    return None;
                }
            }
            Segment::Param(name) => params.push((name.clone(), Cow::Borrowed(*value))),
        }
    }

    Some(params)
}

#[cfg(test)]
mod template_tests {
    use super::*;

    fn seg(path: &str) -> Vec<&[u8]> {
        path.split('/').filter(|s| !s.is_empty()).map(str::as_bytes).collect()
    }

    #[test]
    fn matches_literal_path() {
        let template = parse_template("/api/users");
        assert!(match_template(&template, &seg("/api/users"), false).is_some());
        assert!(match_template(&template, &seg("/api/other"), false).is_none());
    }

    #[test]
    fn captures_named_parameters() {
        let template = parse_template("/users/<id>/items/<item_id>");
        let params = match_template(&template, &seg("/users/42/items/7"), false).unwrap();

        assert_eq!(params[0].0, "id");
        assert_eq!(params[0].1.as_ref(), b"42");
        assert_eq!(params[1].0, "item_id");
        assert_eq!(params[1].1.as_ref(), b"7");
    }

    #[test]
    fn rejects_length_mismatch() {
        let template = parse_template("/users/<id>");
        assert!(match_template(&template, &seg("/users/1/extra"), false).is_none());
    }

    #[test]
    fn case_insensitive_literal_match() {
        let template = parse_template("/Users");
        assert!(match_template(&template, &seg("/users"), true).is_some());
        assert!(match_template(&template, &seg("/users"), false).is_none());
    }
}

#[cfg(test)]
mod router_tests {
    use super::*;
    use crate::{limits::RouterOptions, server::connection::HttpConnection, StatusCode};

    #[derive(Default)]
    struct Log(Vec<&'static str>);

    impl ConnectionData for Log {
        fn new() -> Self {
            Log(Vec::new())
        }

        fn reset(&mut self) {
            self.0.clear();
        }
    }

    fn request(raw: &str) -> Request {
        let mut conn = HttpConnection::from_req(raw);
        conn.parse().unwrap();
        conn.request
    }

    struct Echo(&'static str);

    impl RouteHandler<Log> for Echo {
        async fn handle(
            &self,
            _: &mut Log,
            _: &Request,
            params: &RouteParams,
            response: &mut Response,
        ) -> Handled {
            let id = params.get("id").map(|v| String::from_utf8_lossy(v).into_owned());
            response
                .status(StatusCode::Ok)
                .body(id.unwrap_or_else(|| self.0.to_string()))
        }
    }

    struct Tag(&'static str, MiddlewareMode);

    impl Middleware<Log> for Tag {
        fn mode(&self) -> MiddlewareMode {
            self.1
        }

        async fn execute(
            &self,
            data: &mut Log,
            _: &Request,
            _: &RouteParams,
            _: &mut Response,
        ) -> Option<Handled> {
            data.0.push(self.0);
            None
        }
    }

    #[tokio::test]
    async fn dispatches_to_matched_route_handler_with_params() {
        let mut router = Router::<Log>::new(RouterOptions::default());
        router
            .route("/users/<id>", MethodMask::GET, Echo("users"))
            .unwrap();

        let req = request("GET /users/42 HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        assert!(response.buffer().ends_with(b"42"));
    }

    #[tokio::test]
    async fn method_not_allowed_uses_custom_handler_when_registered() {
        let mut router = Router::<Log>::new(RouterOptions::default());
        router
            .route("/users", MethodMask::GET, Echo("users"))
            .unwrap();
        router.method_not_allowed_handler(Echo("nope"));

        let req = request("POST /users HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        assert!(response.buffer().ends_with(b"nope"));
    }

    #[tokio::test]
    async fn not_found_without_custom_handler_is_bare_404() {
        let router = Router::<Log>::new(RouterOptions::default());

        let req = request("GET /missing HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        assert!(response.buffer().starts_with(b"HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn middleware_runs_global_then_route_before_handler_then_route_then_global_after() {
        let mut router = Router::<Log>::new(RouterOptions::default());
        router.global_middleware(Tag("global-before", MiddlewareMode::BeforeResponse));
        router.global_middleware(Tag("global-after", MiddlewareMode::AfterResponse));

        router
            .route("/ping", MethodMask::GET, Echo("pong"))
            .unwrap();
        router.route_middleware(Tag("route-before", MiddlewareMode::BeforeResponse));
        router.route_middleware(Tag("route-after", MiddlewareMode::AfterResponse));

        let req = request("GET /ping HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        assert_eq!(
            data.0,
            vec!["global-before", "route-before", "route-after", "global-after"]
        );
    }

    #[tokio::test]
    async fn implicit_head_falls_back_to_get_route_and_drops_body() {
        let mut options = RouterOptions::default();
        options.implicit_head = true;

        let mut router = Router::<Log>::new(options);
        router
            .route("/users/<id>", MethodMask::GET, Echo("users"))
            .unwrap();

        let req = request("HEAD /users/42 HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        let buffer = response.buffer();
        assert!(buffer.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(buffer.ends_with(b"\r\n\r\n"));
        assert!(!buffer.ends_with(b"42"));
    }

    #[tokio::test]
    async fn head_without_implicit_head_option_is_not_found() {
        let router_options = RouterOptions::default();
        assert!(!router_options.implicit_head);

        let mut router = Router::<Log>::new(RouterOptions::default());
        router
            .route("/users/<id>", MethodMask::GET, Echo("users"))
            .unwrap();

        let req = request("HEAD /users/42 HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        assert!(response.buffer().starts_with(b"HTTP/1.1 404"));
    }

    #[test]
    fn catches_panics_reflects_throw_exceptions_option() {
        let router = Router::<Log>::new(RouterOptions::default());
        assert!(router.catches_panics());

        let mut options = RouterOptions::default();
        options.throw_exceptions = true;
        let router = Router::<Log>::new(options);
        assert!(!router.catches_panics());
    }

    #[tokio::test]
    async fn bypass_global_skips_global_middleware_for_that_route() {
        let mut router = Router::<Log>::new(RouterOptions::default());
        let global = router.global_middleware(Tag("global-before", MiddlewareMode::BeforeResponse));

        router
            .route("/exempt", MethodMask::GET, Echo("pong"))
            .unwrap();
        router.bypass_global(global);

        let req = request("GET /exempt HTTP/1.1\r\n\r\n");
        let mut data = Log::new();
        let mut response = Response::new(&crate::limits::RespLimits::default());

        router.handle(&mut data, &req, &mut response).await;

        assert!(data.0.is_empty());
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn collision_on_same_template_and_overlapping_methods() {
        let mut table = RoutingTable::new(RouterOptions::default());
        table.add_route("/users", MethodMask::GET, 0).unwrap();

        let err = table.add_route("/users", MethodMask::GET, 1).unwrap_err();
        assert!(matches!(err, RouteError::Collision { .. }));
    }

    #[test]
    fn collision_on_same_shape_with_different_param_names() {
        let mut table = RoutingTable::new(RouterOptions::default());
        table.add_route("/users/<id>", MethodMask::GET, 0).unwrap();

        let err = table
            .add_route("/users/<name>", MethodMask::GET, 1)
            .unwrap_err();
        assert!(matches!(err, RouteError::Collision { .. }));
    }

    #[test]
    fn no_collision_for_disjoint_methods() {
        let mut table = RoutingTable::new(RouterOptions::default());
        table.add_route("/users", MethodMask::GET, 0).unwrap();
        assert!(table.add_route("/users", MethodMask::POST, 1).is_ok());
    }

    #[test]
    fn invalid_regex_is_rejected_at_registration() {
        let mut table = RoutingTable::new(RouterOptions::default());
        let err = table
            .add_regex_route("(unclosed", MethodMask::GET, 0)
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidPattern { .. }));
    }
}
