//! Route table and lookup.
//!
//! # Responsibilities
//! - Store compiled routes in declaration order
//! - Look up the first route matching a method and pathname
//! - Guarantee a catch-all so every lookup resolves
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in declaration order (route counts are small)
//! - The catch-all is held outside the scanned list, so lookup never fails

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;

use crate::http::payload::ResponsePayload;
use crate::http::request::NormalizedRequest;
use crate::http::invoke::HandlerError;
use crate::routing::pattern::{Params, Pattern, PatternError};

pub type HandlerFuture = BoxFuture<'static, Result<ResponsePayload, HandlerError>>;

/// An asynchronous route handler.
pub type Handler = Arc<dyn Fn(Arc<NormalizedRequest>) -> HandlerFuture + Send + Sync>;

/// HTTP method a route accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMethod {
    Any,
    Exact(Method),
}

impl RouteMethod {
    fn accepts(&self, method: &Method) -> bool {
        match self {
            RouteMethod::Any => true,
            RouteMethod::Exact(expected) => expected == method,
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Any => f.write_str("*"),
            RouteMethod::Exact(method) => write!(f, "{method}"),
        }
    }
}

/// A (pattern, method, handler) triple.
#[derive(Clone)]
pub struct Route {
    pattern: Pattern,
    method: RouteMethod,
    handler: Handler,
}

impl Route {
    pub fn new<F, Fut>(method: RouteMethod, pattern: &str, f: F) -> Result<Self, PatternError>
    where
        F: Fn(Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponsePayload, HandlerError>> + Send + 'static,
    {
        Ok(Self {
            pattern: Pattern::parse(pattern)?,
            method,
            handler: boxed(f),
        })
    }

    pub fn get<F, Fut>(pattern: &str, handler: F) -> Result<Self, PatternError>
    where
        F: Fn(Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponsePayload, HandlerError>> + Send + 'static,
    {
        Self::new(RouteMethod::Exact(Method::GET), pattern, handler)
    }

    pub fn post<F, Fut>(pattern: &str, handler: F) -> Result<Self, PatternError>
    where
        F: Fn(Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponsePayload, HandlerError>> + Send + 'static,
    {
        Self::new(RouteMethod::Exact(Method::POST), pattern, handler)
    }

    /// The `*` / any-method route.
    pub fn catch_all<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponsePayload, HandlerError>> + Send + 'static,
    {
        Self {
            pattern: Pattern::catch_all(),
            method: RouteMethod::Any,
            handler: boxed(f),
        }
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn method(&self) -> &RouteMethod {
        &self.method
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    fn is_catch_all(&self) -> bool {
        self.method == RouteMethod::Any && self.pattern.is_catch_all()
    }
}

fn boxed<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponsePayload, HandlerError>> + Send + 'static,
{
    Arc::new(move |req| -> HandlerFuture { Box::pin(f(req)) })
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// The route selected for a request and its captured parameters.
#[derive(Debug)]
pub struct Match<'a> {
    pub route: &'a Route,
    pub params: Params,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("route table must end with a catch-all route (`*`, any method)")]
    MissingCatchAll,
}

/// Ordered, immutable list of routes ending in a catch-all.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
    fallback: Route,
}

impl RouteTable {
    /// Freeze `routes`. The last route must be the catch-all.
    pub fn new(mut routes: Vec<Route>) -> Result<Self, RouteTableError> {
        match routes.pop() {
            Some(fallback) if fallback.is_catch_all() => Ok(Self { routes, fallback }),
            _ => Err(RouteTableError::MissingCatchAll),
        }
    }

    /// First route in declaration order whose method and full pattern match.
    pub fn match_route(&self, method: &Method, pathname: &str) -> Match<'_> {
        for route in &self.routes {
            if !route.method.accepts(method) {
                continue;
            }
            if let Some(params) = route.pattern.matches(pathname) {
                return Match { route, params };
            }
        }

        let params = self.fallback.pattern.matches(pathname).unwrap_or_default();
        Match {
            route: &self.fallback,
            params,
        }
    }

    /// Number of routes including the catch-all.
    pub fn len(&self) -> usize {
        self.routes.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().chain(std::iter::once(&self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::payload::ResponsePayload;

    async fn empty(_req: Arc<NormalizedRequest>) -> Result<ResponsePayload, HandlerError> {
        Ok(ResponsePayload::empty())
    }

    fn table() -> RouteTable {
        RouteTable::new(vec![
            Route::get("/pg/", empty).unwrap(),
            Route::post("/pg/api/:name", empty).unwrap(),
            Route::get("/pg/:database/", empty).unwrap(),
            Route::get("/pg/:database/repl/", empty).unwrap(),
            Route::post("/pg/:database/query", empty).unwrap(),
            Route::get("/pg/:database/:table", empty).unwrap(),
            Route::get("/build/*", empty).unwrap(),
            Route::get("/", empty).unwrap(),
            Route::catch_all(empty),
        ])
        .unwrap()
    }

    #[test]
    fn test_parameter_extraction() {
        let table = table();
        let m = table.match_route(&Method::GET, "/pg/acme/orders");
        assert_eq!(m.route.pattern(), "/pg/:database/:table");
        assert_eq!(m.params.get("database").map(String::as_str), Some("acme"));
        assert_eq!(m.params.get("table").map(String::as_str), Some("orders"));
    }

    #[test]
    fn test_specific_patterns_are_exclusive() {
        let table = table();
        assert_eq!(
            table.match_route(&Method::GET, "/pg/foo/repl/").route.pattern(),
            "/pg/:database/repl/"
        );
        assert_eq!(
            table.match_route(&Method::GET, "/pg/foo/").route.pattern(),
            "/pg/:database/"
        );
    }

    #[test]
    fn test_method_must_match() {
        let table = table();
        assert_eq!(
            table.match_route(&Method::POST, "/pg/acme/query").route.pattern(),
            "/pg/:database/query"
        );
        // GET on the query endpoint falls through to the table listing
        assert_eq!(
            table.match_route(&Method::GET, "/pg/acme/query").route.pattern(),
            "/pg/:database/:table"
        );
        assert_eq!(
            table.match_route(&Method::DELETE, "/pg/").route.pattern(),
            "*"
        );
    }

    #[test]
    fn test_wildcard_capture() {
        let table = table();
        let m = table.match_route(&Method::GET, "/build/img/a.png");
        assert_eq!(m.route.pattern(), "/build/*");
        assert_eq!(m.params.get("splat").map(String::as_str), Some("img/a.png"));
    }

    #[test]
    fn test_catch_all_totality() {
        let table = table();
        for (method, path) in [
            (Method::GET, "/nope"),
            (Method::PUT, "/pg/acme/orders"),
            (Method::GET, "/pg/acme/orders/extra"),
            (Method::PATCH, "/"),
        ] {
            let m = table.match_route(&method, path);
            assert_eq!(m.route.pattern(), "*");
            assert_eq!(m.route.method(), &RouteMethod::Any);
        }
    }

    #[test]
    fn test_matching_is_deterministic() {
        let table = table();
        let first = table.match_route(&Method::GET, "/pg/acme/orders");
        let second = table.match_route(&Method::GET, "/pg/acme/orders");
        assert_eq!(first.route.pattern(), second.route.pattern());
        assert_eq!(first.params, second.params);
    }

    #[test]
    fn test_first_match_wins() {
        let table = RouteTable::new(vec![
            Route::get("/pg/:database/:table", empty).unwrap(),
            Route::get("/pg/acme/orders", empty).unwrap(),
            Route::catch_all(empty),
        ])
        .unwrap();
        assert_eq!(
            table.match_route(&Method::GET, "/pg/acme/orders").route.pattern(),
            "/pg/:database/:table"
        );
    }

    #[test]
    fn test_catch_all_required() {
        let err = RouteTable::new(vec![Route::get("/", empty).unwrap()]).unwrap_err();
        assert_eq!(err, RouteTableError::MissingCatchAll);
        assert_eq!(RouteTable::new(vec![]).unwrap_err(), RouteTableError::MissingCatchAll);

        let table = RouteTable::new(vec![Route::catch_all(empty)]).unwrap();
        assert_eq!(table.len(), 1);
    }
}
