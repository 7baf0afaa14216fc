//! Named database operations exposed at `POST /pg/api/:name`.
//!
//! Each operation deserializes its own parameter struct from the request
//! body. Only names on [`ALLOWED_OPERATIONS`] can be registered, so request
//! input can never reach anything else.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::invoke::HandlerError;
use crate::http::request::Query;
use crate::pg::{ConnectionParams, DbError, PgApi};

pub const ALLOWED_OPERATIONS: [&str; 9] = [
    "databases",
    "tables",
    "table",
    "columns",
    "relations",
    "attributes",
    "constraints",
    "count",
    "query",
];

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("unknown API operation `{0}`")]
    UnknownOperation(String),
    #[error("`{0}` is not an allowed API operation")]
    NotAllowed(String),
    #[error("`{0}` is registered twice")]
    Duplicate(String),
    #[error("invalid parameters for `{operation}`: {source}")]
    InvalidParams {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
}

type RpcFuture = BoxFuture<'static, Result<Value, HandlerError>>;
type Operation = Arc<dyn Fn(Arc<PgApi>, Value) -> RpcFuture + Send + Sync>;

/// Operation name → typed operation.
pub struct RpcRegistry {
    api: Arc<PgApi>,
    operations: BTreeMap<&'static str, Operation>,
}

impl RpcRegistry {
    pub fn new(api: Arc<PgApi>) -> Self {
        Self {
            api,
            operations: BTreeMap::new(),
        }
    }

    /// Every allowed operation, wired to [`PgApi`].
    pub fn standard(api: Arc<PgApi>) -> Result<Self, RpcError> {
        Self::new(api)
            .register("databases", |api, p: ConnectionParams| async move {
                api.databases(&api.defaults().with_overrides(&p)).await
            })?
            .register("tables", |api, p: ConnectionParams| async move {
                api.tables(&api.defaults().with_overrides(&p)).await
            })?
            .register("table", |api, p: TableParams| async move {
                let config = api.defaults().with_overrides(&p.connection);
                api.table(&config, &p.table, &p.filters).await
            })?
            .register("columns", |api, p: ColumnsParams| async move {
                let config = api.defaults().with_overrides(&p.connection);
                api.columns(&config, &p.tables).await
            })?
            .register("relations", |api, p: ConnectionParams| async move {
                api.relations(&api.defaults().with_overrides(&p)).await
            })?
            .register("attributes", |api, p: RelationParams| async move {
                let config = api.defaults().with_overrides(&p.connection);
                api.attributes(&config, p.relid).await
            })?
            .register("constraints", |api, p: RelationParams| async move {
                let config = api.defaults().with_overrides(&p.connection);
                api.constraints(&config, p.relid).await
            })?
            .register("count", |api, p: CountParams| async move {
                let config = api.defaults().with_overrides(&p.connection);
                api.count(&config, &p.table).await
            })?
            .register("query", |api, p: QueryParams| async move {
                let config = api.defaults().with_overrides(&p.connection);
                let variables = p.variables.into_vec().map_err(DbError::Decode)?;
                api.query(&config, &p.sql, &variables).await
            })
    }

    /// Add `name`, which must be on the allow-list and not yet registered.
    pub fn register<P, F, Fut, T>(mut self, name: &'static str, operation: F) -> Result<Self, RpcError>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(Arc<PgApi>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        if !ALLOWED_OPERATIONS.contains(&name) {
            return Err(RpcError::NotAllowed(name.to_string()));
        }
        if self.operations.contains_key(name) {
            return Err(RpcError::Duplicate(name.to_string()));
        }

        let operation: Operation = Arc::new(move |api, params| -> RpcFuture {
            let call = serde_json::from_value::<P>(params)
                .map(|params| operation(api, params))
                .map_err(|source| RpcError::InvalidParams {
                    operation: name.to_string(),
                    source,
                });
            Box::pin(async move {
                let output = call?.await?;
                serde_json::to_value(output).map_err(HandlerError::Serialize)
            })
        });
        self.operations.insert(name, operation);
        Ok(self)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.keys().copied()
    }

    /// Run the operation called `name` with a JSON body.
    pub async fn call(&self, name: &str, params: Value) -> Result<Value, HandlerError> {
        let operation = self
            .operations
            .get(name)
            .ok_or_else(|| RpcError::UnknownOperation(name.to_string()))?;
        tracing::debug!(operation = name, "RPC call");
        operation(Arc::clone(&self.api), params).await
    }
}

#[derive(Debug, Deserialize)]
struct TableParams {
    #[serde(flatten)]
    connection: ConnectionParams,
    table: String,
    #[serde(default)]
    filters: Query,
}

#[derive(Debug, Deserialize)]
struct ColumnsParams {
    #[serde(flatten)]
    connection: ConnectionParams,
    tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RelationParams {
    #[serde(flatten)]
    connection: ConnectionParams,
    relid: u32,
}

#[derive(Debug, Deserialize)]
struct CountParams {
    #[serde(flatten)]
    connection: ConnectionParams,
    table: String,
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    #[serde(flatten)]
    connection: ConnectionParams,
    sql: String,
    #[serde(default)]
    variables: Variables,
}

/// Query variables: a JSON list, or the JSON text of one as typed into the REPL.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Variables {
    List(Vec<Value>),
    Json(String),
}

impl Default for Variables {
    fn default() -> Self {
        Variables::List(Vec::new())
    }
}

impl Variables {
    pub fn into_vec(self) -> Result<Vec<Value>, serde_json::Error> {
        match self {
            Variables::List(values) => Ok(values),
            Variables::Json(text) if text.trim().is_empty() => Ok(Vec::new()),
            Variables::Json(text) => serde_json::from_str(&text),
        }
    }
}
