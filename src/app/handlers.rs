//! Route handlers.
//!
//! Handlers only produce payloads. Deciding between HTML and JSON is the
//! renderer's job.

use std::sync::Arc;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::rpc::Variables;
use crate::app::AppContext;
use crate::http::invoke::HandlerError;
use crate::http::payload::{ErrorProps, ResponsePayload};
use crate::http::request::NormalizedRequest;
use crate::pg::{QueryResult, Relation};
use crate::routing::SPLAT;
use crate::views::Component;

type HandlerResult = Result<ResponsePayload, HandlerError>;

fn param<'a>(req: &'a NormalizedRequest, name: &str) -> Result<&'a str, HandlerError> {
    req.param(name)
        .ok_or_else(|| HandlerError::message(format!("missing route parameter `{name}`")))
}

fn view<P: Serialize>(component: Component, props: &P) -> HandlerResult {
    ResponsePayload::view(component, props).map_err(HandlerError::Serialize)
}

/// `GET /pg/`
pub async fn databases(ctx: AppContext, _req: Arc<NormalizedRequest>) -> HandlerResult {
    let result = ctx.api.databases(ctx.api.defaults()).await?;
    view(Component::QueryResult, &result)
}

/// `POST /pg/api/:name`
pub async fn rpc(ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    let name = param(&req, "name")?;
    let params = req.body.clone().unwrap_or_else(|| json!({}));
    let output = ctx.rpc.call(name, params).await?;
    ResponsePayload::json(&output).map_err(HandlerError::Serialize)
}

#[derive(Debug, Serialize)]
struct DatabaseProps<'a> {
    relations: &'a [Relation],
}

/// `GET /pg/:database/`
pub async fn database(ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    let config = ctx.api.defaults().for_database(param(&req, "database")?);
    let relations = ctx.api.relations(&config).await?;
    view(Component::Database, &DatabaseProps { relations: &relations })
}

#[derive(Debug, Serialize)]
struct ReplProps<'a> {
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a str>,
}

/// `GET /pg/:database/repl/`
pub async fn repl(_ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    let props = ReplProps {
        database: param(&req, "database")?,
        sql: req.query_first("sql"),
        variables: req
            .query_first("variables")
            .or_else(|| req.query_first("variablesJSON")),
    };
    view(Component::Repl, &props)
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    sql: String,
    #[serde(default)]
    variables: Variables,
}

/// `POST /pg/:database/query`
pub async fn query(ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    let config = ctx.api.defaults().for_database(param(&req, "database")?);
    let body = req.body.clone().ok_or(HandlerError::MissingBody)?;
    let body: QueryBody = serde_json::from_value(body).map_err(HandlerError::InvalidBody)?;
    let variables = body.variables.into_vec().map_err(HandlerError::InvalidBody)?;
    let result = ctx.api.query(&config, &body.sql, &variables).await?;
    view(Component::QueryResult, &result)
}

/// `Content-Range` value for a listing: `<table> 0-<rows>/<total>`.
pub fn content_range(table: &str, result: &QueryResult, total: i64) -> String {
    format!("{table} 0-{}/{total}", result.rows.len())
}

/// `GET /pg/:database/:table`
pub async fn table(ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    let config = ctx.api.defaults().for_database(param(&req, "database")?);
    let table = param(&req, "table")?;
    let (result, total) = ctx.api.table_page(&config, table, &req.query).await?;
    table_view(table, &result, total)
}

fn table_view(table: &str, result: &QueryResult, total: i64) -> HandlerResult {
    Ok(view(Component::QueryResult, result)?.header("Content-Range", content_range(table, result, total)))
}

async fn asset(ctx: &AppContext, relative: &str) -> HandlerResult {
    match ctx.assets.open(relative).await {
        Ok(asset) => Ok(ResponsePayload::stream(asset.stream)
            .header("Content-Type", asset.content_type)
            .header("Content-Length", asset.len.to_string())),
        Err(error) => {
            let status = error.status();
            if status.is_server_error() {
                tracing::error!(path = relative, error = %error, "Failed to open asset");
            } else {
                tracing::debug!(path = relative, error = %error, "Asset not served");
            }
            Ok(ResponsePayload::error(
                status,
                ErrorProps {
                    message: error.to_string(),
                    stack: None,
                },
            ))
        }
    }
}

/// `GET /build/*`
pub async fn build_asset(ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    let splat = req.param(SPLAT).unwrap_or("");
    asset(&ctx, &format!("build/{splat}")).await
}

/// `GET /static/*`
pub async fn static_asset(ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    asset(&ctx, req.param(SPLAT).unwrap_or("")).await
}

/// `GET /`
pub async fn root(_ctx: AppContext, _req: Arc<NormalizedRequest>) -> HandlerResult {
    Ok(ResponsePayload::redirect("/pg/"))
}

/// `* *`
pub async fn not_found(_ctx: AppContext, req: Arc<NormalizedRequest>) -> HandlerResult {
    Ok(ResponsePayload::error(
        StatusCode::NOT_FOUND,
        ErrorProps {
            message: format!("No route matches {} {}", req.method, req.pathname),
            stack: None,
        },
    ))
}
