//! Shapes exchanged with the database layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where to connect. One pool exists per distinct value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl ConnectionConfig {
    /// `self` with any field supplied by `params` replaced.
    pub fn with_overrides(&self, params: &ConnectionParams) -> Self {
        Self {
            host: params.host.clone().unwrap_or_else(|| self.host.clone()),
            port: params.port.unwrap_or(self.port),
            user: params.user.clone().unwrap_or_else(|| self.user.clone()),
            password: params.password.clone().or_else(|| self.password.clone()),
            database: params.database.clone().unwrap_or_else(|| self.database.clone()),
        }
    }

    pub fn for_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
        }
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

// the password never reaches the logs
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// Connection fields a caller may supply per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

/// Result column description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "tableID")]
    pub table_id: u32,
    #[serde(rename = "columnID")]
    pub column_id: i16,
    #[serde(rename = "dataTypeID")]
    pub data_type_id: u32,
    #[serde(rename = "dataTypeName")]
    pub data_type_name: String,
}

pub type Row = Map<String, Value>;

/// Rows and column metadata of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub command: String,
    pub row_count: u64,
    pub rows: Vec<Row>,
    pub fields: Vec<Field>,
    /// Milliseconds spent on the round trip.
    pub time_elapsed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attname: String,
    pub attnum: i16,
    pub atttyp: String,
    pub attnotnull: bool,
    pub adsrc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub conname: String,
    pub contype: Option<String>,
    pub conkey: Option<Vec<i16>>,
    pub confrelname: Option<String>,
    pub fkeyattnames: Option<String>,
}

/// A `pg_class` entry with its columns and constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub relid: u32,
    pub relname: String,
    pub relkind: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overrides() {
        let defaults = ConnectionConfig::default();
        let params: ConnectionParams =
            serde_json::from_value(json!({"database": "acme", "port": 6543})).unwrap();
        let config = defaults.with_overrides(&params);
        assert_eq!(config.database, "acme");
        assert_eq!(config.port, 6543);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.to_string(), "postgres@127.0.0.1:6543/acme");
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ConnectionConfig {
            password: Some("hunter2".into()),
            ..ConnectionConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_query_result_wire_names() {
        let result = QueryResult {
            command: "SELECT".into(),
            row_count: 0,
            rows: vec![],
            fields: vec![Field {
                name: "datname".into(),
                table_id: 1262,
                column_id: 2,
                data_type_id: 19,
                data_type_name: "name".into(),
            }],
            time_elapsed: 3,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["rowCount"], 0);
        assert_eq!(value["timeElapsed"], 3);
        assert_eq!(value["fields"][0]["dataTypeID"], 19);
        assert_eq!(value["fields"][0]["tableID"], 1262);
    }
}
