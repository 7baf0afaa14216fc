//! The application: its route table and the collaborators handlers share.
//!
//! # Routes (in match order)
//! ```text
//! GET  /pg/                  databases            → QueryResult
//! POST /pg/api/:name         RPC registry         → JSON
//! GET  /pg/:database/        relations            → Database
//! GET  /pg/:database/repl/   sql + variables      → Repl
//! POST /pg/:database/query   query                → QueryResult
//! GET  /pg/:database/:table  rows + count         → QueryResult, Content-Range
//! GET  /build/*              <assets>/build/*     → stream
//! GET  /static/*             <assets>/*           → stream
//! GET  /                     302 /pg/
//! *    *                     404 Error
//! ```

pub mod assets;
pub mod handlers;
pub mod rpc;

use std::future::Future;
use std::sync::Arc;

use crate::http::invoke::HandlerError;
use crate::http::payload::ResponsePayload;
use crate::http::request::NormalizedRequest;
use crate::pg::PgApi;
use crate::routing::{PatternError, Route, RouteTable, RouteTableError};

pub use assets::Assets;
pub use rpc::{RpcError, RpcRegistry};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    RouteTable(#[from] RouteTableError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub api: Arc<PgApi>,
    pub rpc: Arc<RpcRegistry>,
    pub assets: Arc<Assets>,
}

impl AppContext {
    pub fn new(api: Arc<PgApi>, assets: Assets) -> Result<Self, AppError> {
        let rpc = RpcRegistry::standard(Arc::clone(&api))?;
        Ok(Self {
            api,
            rpc: Arc::new(rpc),
            assets: Arc::new(assets),
        })
    }
}

/// Bind `ctx` into a handler of the shape routes expect.
fn bind<F, Fut>(ctx: &AppContext, handler: F) -> impl Fn(Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static
where
    F: Fn(AppContext, Arc<NormalizedRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponsePayload, HandlerError>> + Send + 'static,
{
    let ctx = ctx.clone();
    move |req| handler(ctx.clone(), req)
}

/// The application's route table.
pub fn routes(ctx: &AppContext) -> Result<RouteTable, AppError> {
    let table = RouteTable::new(vec![
        Route::get("/pg/", bind(ctx, handlers::databases))?,
        Route::post("/pg/api/:name", bind(ctx, handlers::rpc))?,
        Route::get("/pg/:database/", bind(ctx, handlers::database))?,
        Route::get("/pg/:database/repl/", bind(ctx, handlers::repl))?,
        Route::post("/pg/:database/query", bind(ctx, handlers::query))?,
        Route::get("/pg/:database/:table", bind(ctx, handlers::table))?,
        Route::get("/build/*", bind(ctx, handlers::build_asset))?,
        Route::get("/static/*", bind(ctx, handlers::static_asset))?,
        Route::get("/", bind(ctx, handlers::root))?,
        Route::catch_all(bind(ctx, handlers::not_found)),
    ])?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::{ConnectionConfig, PoolSettings};
    use axum::http::Method;

    fn table() -> RouteTable {
        let api = Arc::new(PgApi::new(ConnectionConfig::default(), PoolSettings::default()));
        let ctx = AppContext::new(api, Assets::new("static")).unwrap();
        routes(&ctx).unwrap()
    }

    #[test]
    fn test_route_selection() {
        let table = table();
        let cases = [
            (Method::GET, "/pg/", "/pg/"),
            (Method::POST, "/pg/api/databases", "/pg/api/:name"),
            (Method::GET, "/pg/acme/", "/pg/:database/"),
            (Method::GET, "/pg/acme/repl/", "/pg/:database/repl/"),
            (Method::POST, "/pg/acme/query", "/pg/:database/query"),
            (Method::GET, "/pg/acme/orders", "/pg/:database/:table"),
            (Method::GET, "/build/img/a.png", "/build/*"),
            (Method::GET, "/static/build/site.css", "/static/*"),
            (Method::GET, "/", "/"),
            (Method::DELETE, "/pg/", "*"),
            (Method::GET, "/pg/acme/orders/extra", "*"),
        ];
        for (method, path, pattern) in cases {
            let found = table.match_route(&method, path);
            assert_eq!(found.route.pattern(), pattern, "{method} {path}");
        }
    }

    #[test]
    fn test_round_trip_params() {
        let table = table();
        let found = table.match_route(&Method::GET, "/pg/acme/orders");
        assert_eq!(found.params.get("database").map(String::as_str), Some("acme"));
        assert_eq!(found.params.get("table").map(String::as_str), Some("orders"));

        let found = table.match_route(&Method::GET, "/build/img/a.png");
        assert_eq!(found.params.get("splat").map(String::as_str), Some("img/a.png"));
    }
}
