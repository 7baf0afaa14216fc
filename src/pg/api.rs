//! Catalog and query operations.
//!
//! Every operation takes a [`ConnectionConfig`], checks a connection out of
//! that target's pool, and runs each round trip under the query deadline.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures_util::{pin_mut, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_postgres::types::ToSql;

use crate::http::request::{Query, QueryValue};
use crate::observability::metrics;
use crate::pg::pool::{PgConn, Pool, PoolSettings, Pooled};
use crate::pg::value::{array_literal, quote_ident, PgValue, TextParam};
use crate::pg::{Attribute, ConnectionConfig, Constraint, DbError, Field, QueryResult, Relation, Row};
use crate::resilience::with_deadline;

/// Rows returned by a table listing.
pub const TABLE_PAGE_LIMIT: usize = 500;

const EXCLUDED_SCHEMAS: &str =
    "'pg_toast', 'pg_temp_1', 'pg_toast_temp_1', 'pg_catalog', 'information_schema'";

const DATABASES_SQL: &str = "\
SELECT datname,
  pg_catalog.pg_get_userbyid(datdba) AS datdba,
  pg_catalog.pg_encoding_to_char(encoding) AS encoding,
  datcollate,
  datctype,
  datistemplate,
  datallowconn,
  datconnlimit,
  datacl::text[] AS datacl
FROM pg_catalog.pg_database
ORDER BY datname";

const TABLES_SQL: &str = "\
SELECT * FROM information_schema.tables
WHERE table_schema NOT IN ('pg_catalog', 'information_schema')";

const COLUMNS_SQL: &str = "\
SELECT * FROM information_schema.columns
WHERE table_schema NOT IN ('pg_catalog', 'information_schema') AND table_name = ANY($1)";

// attnum is negative for system columns; dropped columns linger until vacuum
const ATTRIBUTES_SQL: &str = "\
SELECT attrelid,
  attname,
  attnum,
  pg_catalog.format_type(atttypid, atttypmod) AS atttyp,
  attnotnull,
  pg_catalog.pg_get_expr(adbin, adrelid) AS adsrc
FROM pg_catalog.pg_attribute
  LEFT OUTER JOIN pg_catalog.pg_attrdef ON adrelid = attrelid AND attnum = adnum
WHERE attrelid = ANY($1) AND attnum > 0 AND NOT attisdropped
ORDER BY attrelid, attnum";

const CONSTRAINTS_SQL: &str = "\
SELECT conrelid,
  conname,
  CASE contype
    WHEN 'c' THEN 'check constraint'
    WHEN 'f' THEN 'foreign key constraint'
    WHEN 'p' THEN 'primary key constraint'
    WHEN 'u' THEN 'unique constraint'
    WHEN 't' THEN 'constraint trigger'
    WHEN 'x' THEN 'exclusion constraint'
  END AS contype,
  conkey,
  CASE WHEN confrelid = 0 THEN NULL ELSE confrelid::regclass::text END AS confrelname,
  string_agg(fkeyatt.attname, ',') AS fkeyattnames
FROM pg_catalog.pg_constraint
  LEFT OUTER JOIN pg_catalog.pg_attribute AS fkeyatt
    ON fkeyatt.attrelid = confrelid AND fkeyatt.attnum = ANY(confkey)
WHERE conrelid = ANY($1)
GROUP BY pg_constraint.oid, conrelid, conname, contype, confrelid, conkey
ORDER BY conrelid, conname";

/// Database access for handlers and the RPC registry.
pub struct PgApi {
    defaults: ConnectionConfig,
    settings: PoolSettings,
    pools: DashMap<ConnectionConfig, Arc<Pool<PgConn>>>,
}

impl PgApi {
    pub fn new(defaults: ConnectionConfig, settings: PoolSettings) -> Self {
        Self {
            defaults,
            settings,
            pools: DashMap::new(),
        }
    }

    /// Configured connection defaults.
    pub fn defaults(&self) -> &ConnectionConfig {
        &self.defaults
    }

    fn pool(&self, config: &ConnectionConfig) -> Arc<Pool<PgConn>> {
        self.pools
            .entry(config.clone())
            .or_insert_with(|| {
                Pool::new(
                    self.settings.max_connections,
                    self.settings.acquire_timeout,
                    self.settings.idle_timeout,
                )
            })
            .clone()
    }

    /// Close expired idle connections and forget pools nobody is using.
    pub fn evict_idle(&self) -> usize {
        let mut closed = 0;
        self.pools.retain(|target, pool| {
            closed += pool.evict_idle();
            // a pool still referenced elsewhere has a checkout in flight
            let unused = Arc::strong_count(pool) == 1 && pool.is_unused();
            if unused {
                tracing::debug!(target = %target, "Dropping unused pool");
            }
            !unused
        });
        closed
    }

    /// Pools currently held, one per distinct target.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    async fn checkout(&self, config: &ConnectionConfig) -> Result<Pooled<PgConn>, DbError> {
        let connect_timeout = self.settings.connect_timeout;
        self.pool(config)
            .acquire(|| PgConn::connect(config, connect_timeout))
            .await
    }

    /// One statement on a checked-out connection, under the query deadline.
    async fn run(
        &self,
        conn: &mut Pooled<PgConn>,
        operation: &'static str,
        sql: &str,
        params: &[TextParam],
    ) -> Result<QueryResult, DbError> {
        tracing::debug!(operation, sql, params = ?params, "pg:query");
        let started = Instant::now();
        let result = with_deadline(
            operation,
            self.settings.query_timeout,
            execute(conn.get().client(), sql, params),
        )
        .await;
        metrics::record_query(operation, result.is_ok());

        match result {
            Ok(mut result) => {
                result.time_elapsed = started.elapsed().as_millis() as u64;
                Ok(result)
            }
            Err(error) => {
                if matches!(error, DbError::Timeout(_)) {
                    conn.get().cancel();
                }
                if !error.is_reusable() {
                    conn.discard();
                }
                tracing::debug!(operation, error = %error, "pg:query failed");
                Err(error)
            }
        }
    }

    async fn run_once(
        &self,
        config: &ConnectionConfig,
        operation: &'static str,
        sql: &str,
        params: &[TextParam],
    ) -> Result<QueryResult, DbError> {
        let mut conn = self.checkout(config).await?;
        self.run(&mut conn, operation, sql, params).await
    }

    /// Databases accessible on the server.
    pub async fn databases(&self, config: &ConnectionConfig) -> Result<QueryResult, DbError> {
        self.run_once(config, "databases", DATABASES_SQL, &[]).await
    }

    /// User tables of the connected database.
    pub async fn tables(&self, config: &ConnectionConfig) -> Result<QueryResult, DbError> {
        self.run_once(config, "tables", TABLES_SQL, &[]).await
    }

    /// Columns of the named tables.
    pub async fn columns(
        &self,
        config: &ConnectionConfig,
        tables: &[String],
    ) -> Result<QueryResult, DbError> {
        let tables: Vec<Value> = tables.iter().cloned().map(Value::String).collect();
        let params = [TextParam::from(array_literal(&tables).as_str())];
        self.run_once(config, "columns", COLUMNS_SQL, &params).await
    }

    /// Up to 500 rows of `table`; each filter is `column = ANY(values)`.
    pub async fn table(
        &self,
        config: &ConnectionConfig,
        table: &str,
        filters: &Query,
    ) -> Result<QueryResult, DbError> {
        let (sql, params) = table_sql(table, filters)?;
        self.run_once(config, "table", &sql, &params).await
    }

    /// `count(*)` of `table`.
    pub async fn count(&self, config: &ConnectionConfig, table: &str) -> Result<i64, DbError> {
        let sql = count_sql(table)?;
        let result = self.run_once(config, "count", &sql, &[]).await?;
        first_count(&result)
    }

    /// Filtered rows and the table's total, read from one snapshot.
    pub async fn table_page(
        &self,
        config: &ConnectionConfig,
        table: &str,
        filters: &Query,
    ) -> Result<(QueryResult, i64), DbError> {
        let (rows_sql, params) = table_sql(table, filters)?;
        let count_sql = count_sql(table)?;

        let mut conn = self.checkout(config).await?;
        // an open transaction must not go back to the pool, even if this future is dropped
        conn.discard();
        self.run(
            &mut conn,
            "begin",
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY",
            &[],
        )
        .await?;

        let rows = self.run(&mut conn, "table", &rows_sql, &params).await?;
        let count = self.run(&mut conn, "count", &count_sql, &[]).await?;
        let total = first_count(&count)?;
        self.run(&mut conn, "commit", "COMMIT", &[]).await?;
        conn.keep();
        Ok((rows, total))
    }

    /// Columns of one relation.
    pub async fn attributes(
        &self,
        config: &ConnectionConfig,
        relid: u32,
    ) -> Result<Vec<Attribute>, DbError> {
        let mut conn = self.checkout(config).await?;
        let rows = self.catalog_rows(&mut conn, "attributes", ATTRIBUTES_SQL, &[relid]).await?;
        rows.into_iter().map(|(_, row)| decode_row(row)).collect()
    }

    /// Constraints of one relation; `conkey` lists the columns each depends on.
    pub async fn constraints(
        &self,
        config: &ConnectionConfig,
        relid: u32,
    ) -> Result<Vec<Constraint>, DbError> {
        let mut conn = self.checkout(config).await?;
        let rows = self.catalog_rows(&mut conn, "constraints", CONSTRAINTS_SQL, &[relid]).await?;
        rows.into_iter().map(|(_, row)| decode_row(row)).collect()
    }

    /// Every user relation with its attributes and constraints.
    pub async fn relations(&self, config: &ConnectionConfig) -> Result<Vec<Relation>, DbError> {
        let sql = format!(
            "SELECT oid AS relid,
  relname,
  CASE relkind
    WHEN 'r' THEN 'ordinary table'
    WHEN 'i' THEN 'index'
    WHEN 'S' THEN 'sequence'
    WHEN 'v' THEN 'view'
    WHEN 'm' THEN 'materialized view'
    WHEN 'c' THEN 'composite type'
    WHEN 't' THEN 'TOAST table'
    WHEN 'f' THEN 'foreign table'
    WHEN 'p' THEN 'partitioned table'
    WHEN 'I' THEN 'partitioned index'
  END AS relkind
FROM pg_catalog.pg_class
WHERE relnamespace IN (SELECT oid FROM pg_catalog.pg_namespace WHERE nspname NOT IN ({EXCLUDED_SCHEMAS}))
ORDER BY relname"
        );

        let mut conn = self.checkout(config).await?;
        let result = self.run(&mut conn, "relations", &sql, &[]).await?;
        let mut relations: Vec<Relation> = result
            .rows
            .into_iter()
            .map(decode_row)
            .collect::<Result<_, _>>()?;
        let relids: Vec<u32> = relations.iter().map(|r| r.relid).collect();

        let attributes = self.catalog_rows(&mut conn, "attributes", ATTRIBUTES_SQL, &relids).await?;
        let constraints = self.catalog_rows(&mut conn, "constraints", CONSTRAINTS_SQL, &relids).await?;

        for relation in &mut relations {
            relation.attributes = matching(&attributes, relation.relid)?;
            relation.constraints = matching(&constraints, relation.relid)?;
        }
        Ok(relations)
    }

    /// Run arbitrary SQL with JSON variables bound to `$1..$n`.
    pub async fn query(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        variables: &[Value],
    ) -> Result<QueryResult, DbError> {
        let params: Vec<TextParam> = variables.iter().map(TextParam::from).collect();
        self.run_once(config, "query", sql, &params).await
    }

    /// Rows keyed by the relation oid in their first column.
    async fn catalog_rows(
        &self,
        conn: &mut Pooled<PgConn>,
        operation: &'static str,
        sql: &str,
        relids: &[u32],
    ) -> Result<Vec<(u32, Row)>, DbError> {
        let relids: Vec<Value> = relids.iter().map(|&id| Value::from(id)).collect();
        let params = [TextParam::from(array_literal(&relids).as_str())];
        let result = self.run(conn, operation, sql, &params).await?;
        Ok(result
            .rows
            .into_iter()
            .map(|mut row| {
                let relid = row
                    .get("attrelid")
                    .or_else(|| row.get("conrelid"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                row.remove("attrelid");
                row.remove("conrelid");
                (relid, row)
            })
            .collect())
    }
}

async fn execute(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[TextParam],
) -> Result<QueryResult, DbError> {
    let statement = client.prepare(sql).await?;
    let fields: Vec<Field> = statement
        .columns()
        .iter()
        .map(|column| Field {
            name: column.name().to_string(),
            table_id: column.table_oid().unwrap_or(0),
            column_id: column.column_id().unwrap_or(0),
            data_type_id: column.type_().oid(),
            data_type_name: column.type_().name().to_string(),
        })
        .collect();

    let stream = client
        .query_raw(&statement, params.iter().map(|p| p as &dyn ToSql))
        .await?;
    pin_mut!(stream);

    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        let mut map = Row::new();
        for (i, column) in row.columns().iter().enumerate() {
            let PgValue(value) = row.try_get::<_, PgValue>(i)?;
            map.insert(column.name().to_string(), value);
        }
        rows.push(map);
    }
    let row_count = stream.rows_affected().unwrap_or(rows.len() as u64);

    Ok(QueryResult {
        command: command_tag(sql),
        row_count,
        rows,
        fields,
        time_elapsed: 0,
    })
}

/// Leading keyword of a statement, upper-cased: `select 1` → `SELECT`.
pub fn command_tag(sql: &str) -> String {
    let mut rest = sql.trim_start();
    while let Some(comment) = rest.strip_prefix("--") {
        rest = comment.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
    }
    rest.split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

fn table_sql(table: &str, filters: &Query) -> Result<(String, Vec<TextParam>), DbError> {
    let mut sql = format!("SELECT * FROM {}", quote_ident(table)?);
    let mut params = Vec::with_capacity(filters.len());
    for (i, (column, values)) in filters.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("{} = ANY(${})", quote_ident(column)?, i + 1));
        params.push(filter_param(values));
    }
    sql.push_str(&format!(" LIMIT {TABLE_PAGE_LIMIT}"));
    Ok((sql, params))
}

fn filter_param(values: &QueryValue) -> TextParam {
    let values: Vec<Value> = values.to_vec().into_iter().map(Value::String).collect();
    TextParam::from(array_literal(&values).as_str())
}

fn count_sql(table: &str) -> Result<String, DbError> {
    Ok(format!("SELECT count(*) AS count FROM {}", quote_ident(table)?))
}

fn first_count(result: &QueryResult) -> Result<i64, DbError> {
    result
        .rows
        .first()
        .and_then(|row| row.get("count"))
        .and_then(Value::as_i64)
        .ok_or(DbError::NoRows)
}

fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, DbError> {
    serde_json::from_value(Value::Object(row)).map_err(DbError::Decode)
}

fn matching<T: DeserializeOwned>(rows: &[(u32, Row)], relid: u32) -> Result<Vec<T>, DbError> {
    rows.iter()
        .filter(|(id, _)| *id == relid)
        .map(|(_, row)| decode_row(row.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_query;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_command_tag() {
        assert_eq!(command_tag("select 1"), "SELECT");
        assert_eq!(command_tag("  -- note\n  UPDATE t SET x = 1"), "UPDATE");
        assert_eq!(command_tag("WITH x AS (SELECT 1) SELECT * FROM x"), "WITH");
        assert_eq!(command_tag(""), "");
    }

    #[test]
    fn test_table_sql_quotes_and_filters() {
        let filters = parse_query("name=widget&name=gadget&id=1").unwrap();
        let (sql, params) = table_sql("public.orders", &filters).unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "public"."orders" WHERE "id" = ANY($1) AND "name" = ANY($2) LIMIT 500"#
        );
        assert_eq!(params[0].as_str(), Some(r#"{"1"}"#));
        assert_eq!(params[1].as_str(), Some(r#"{"widget","gadget"}"#));
    }

    #[test]
    fn test_table_sql_without_filters() {
        let (sql, params) = table_sql("orders", &Query::new()).unwrap();
        assert_eq!(sql, r#"SELECT * FROM "orders" LIMIT 500"#);
        assert!(params.is_empty());
        assert!(table_sql("", &Query::new()).is_err());
    }

    #[test]
    fn test_first_count() {
        let result = QueryResult {
            command: "SELECT".into(),
            row_count: 1,
            rows: vec![json!({"count": 42}).as_object().unwrap().clone()],
            fields: vec![],
            time_elapsed: 0,
        };
        assert_eq!(first_count(&result).unwrap(), 42);
    }

    #[test]
    fn test_matching_groups_by_relid() {
        let rows = vec![
            (1, json!({"attname": "id", "attnum": 1, "atttyp": "integer", "attnotnull": true, "adsrc": null})),
            (2, json!({"attname": "sku", "attnum": 1, "atttyp": "text", "attnotnull": false, "adsrc": null})),
        ]
        .into_iter()
        .map(|(id, v)| (id, v.as_object().unwrap().clone()))
        .collect::<Vec<_>>();
        let attributes: Vec<Attribute> = matching(&rows, 2).unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].attname, "sku");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connect_error() {
        let api = PgApi::new(
            ConnectionConfig {
                port: 1,
                ..ConnectionConfig::default()
            },
            PoolSettings {
                connect_timeout: Duration::from_secs(2),
                ..PoolSettings::default()
            },
        );
        let err = api.databases(api.defaults()).await.unwrap_err();
        assert!(matches!(err, DbError::Connect { .. } | DbError::Timeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_evict_idle_forgets_unused_pools() {
        let api = PgApi::new(
            ConnectionConfig {
                port: 1,
                ..ConnectionConfig::default()
            },
            PoolSettings::default(),
        );
        let _ = api.databases(api.defaults()).await;
        let _ = api.databases(&api.defaults().for_database("other")).await;
        assert_eq!(api.pool_count(), 2);

        assert_eq!(api.evict_idle(), 0);
        assert_eq!(api.pool_count(), 0);
    }
}
