//! Per-route handler trait, route parameters, and the before/after middleware pipeline.
//!
//! The teacher's [`Handler`](crate::Handler) trait is generic over a single concrete
//! handler type (`Arc<H>`), never boxed — the server never needs more than one handler.
//! A router needs a different handler per route, so this module adds an
//! object-safe adapter around the same `async fn handle(..)` shape, following the
//! manual future-boxing pattern used before `async fn` in traits supported
//! `dyn`-dispatch.

use crate::{server::connection::ConnectionData, Handled, Request, Response};
use std::{borrow::Cow, future::Future, pin::Pin};

/// Path parameters captured by the router for the matched route.
pub struct RouteParams<'req> {
    pub(crate) entries: Vec<(String, Cow<'req, [u8]>)>,
}

impl<'req> RouteParams<'req> {
    pub(crate) fn new(entries: Vec<(String, Cow<'req, [u8]>)>) -> Self {
        Self { entries }
    }

    /// Looks up a captured parameter by name (case-insensitive, per spec).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A handler bound to one or more routes in a [`super::RoutingTable`].
///
/// Identical in spirit to [`Handler`](crate::Handler) but additionally receives
/// the [`RouteParams`] the router extracted for the matched path template.
pub trait RouteHandler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    fn handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        params: &RouteParams,
        response: &mut Response,
    ) -> impl Future<Output = Handled> + Send;
}

type BoxedFuture<'a> = Pin<Box<dyn Future<Output = Handled> + Send + 'a>>;

/// Object-safe adapter so a `Vec` of differently-typed [`RouteHandler`]s can be
/// stored behind one `dyn` pointer per route.
pub(crate) trait ErasedRouteHandler<S>: Sync + Send {
    fn call<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        params: &'a RouteParams<'a>,
        response: &'a mut Response,
    ) -> BoxedFuture<'a>;
}

impl<S, H> ErasedRouteHandler<S> for H
where
    S: ConnectionData,
    H: RouteHandler<S>,
{
    fn call<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        params: &'a RouteParams<'a>,
        response: &'a mut Response,
    ) -> BoxedFuture<'a> {
        Box::pin(self.handle(connection_data, request, params, response))
    }
}

/// When a middleware runs relative to the route handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareMode {
    BeforeResponse,
    AfterResponse,
}

/// A cross-cutting behavior that wraps route dispatch.
///
/// Returning `Some(Handled)` short-circuits the pipeline: no further
/// middleware and, for a `BeforeResponse` middleware, not the handler either.
pub trait Middleware<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    fn mode(&self) -> MiddlewareMode;

    fn execute(
        &self,
        connection_data: &mut S,
        request: &Request,
        params: &RouteParams,
        response: &mut Response,
    ) -> impl Future<Output = Option<Handled>> + Send;
}

pub(crate) trait ErasedMiddleware<S>: Sync + Send {
    fn mode(&self) -> MiddlewareMode;

    fn call<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        params: &'a RouteParams<'a>,
        response: &'a mut Response,
    ) -> Pin<Box<dyn Future<Output = Option<Handled>> + Send + 'a>>;
}

impl<S, M> ErasedMiddleware<S> for M
where
    S: ConnectionData,
    M: Middleware<S>,
{
    fn mode(&self) -> MiddlewareMode {
        Middleware::mode(self)
    }

    fn call<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        params: &'a RouteParams<'a>,
        response: &'a mut Response,
    ) -> Pin<Box<dyn Future<Output = Option<Handled>> + Send + 'a>> {
        Box::pin(self.execute(connection_data, request, params, response))
    }
}

#[cfg(test)]
mod param_tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let params = RouteParams::new(vec![("Id".to_string(), Cow::Borrowed(b"42".as_ref()))]);
        assert_eq!(params.get("id"), Some(b"42".as_ref()));
        assert_eq!(params.get("ID"), Some(b"42".as_ref()));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn empty_params_report_empty() {
        let params: RouteParams = RouteParams::new(Vec::new());
        assert!(params.is_empty());
    }
}
