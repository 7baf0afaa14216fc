//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pg::{ConnectionConfig, PoolSettings};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener.
    pub listener: ListenerConfig,

    /// Default connection target and pool limits.
    pub database: DatabaseConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Static asset directory.
    pub assets: AssetsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind.
    pub hostname: String,

    /// TCP port to bind.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 7972,
        }
    }
}

impl ListenerConfig {
    /// `host:port` in the form `TcpListener::bind` accepts.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Database defaults. Request parameters override the target fields.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub default_database: String,

    /// Connections per distinct target.
    pub max_connections: usize,

    pub connect_timeout_secs: u64,
    pub acquire_timeout_secs: u64,

    /// Deadline for every SQL round trip.
    pub query_timeout_secs: u64,

    /// Idle connections older than this are closed.
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let target = ConnectionConfig::default();
        let pool = PoolSettings::default();
        Self {
            host: target.host,
            port: target.port,
            user: target.user,
            password: target.password,
            default_database: target.database,
            max_connections: pool.max_connections,
            connect_timeout_secs: pool.connect_timeout.as_secs(),
            acquire_timeout_secs: pool.acquire_timeout.as_secs(),
            query_timeout_secs: pool.query_timeout.as_secs(),
            idle_timeout_secs: pool.idle_timeout.as_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.default_database.clone(),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    /// Longest a request can spend in the database: acquire, connect, then
    /// the round trips of the busiest operation.
    pub fn worst_case_secs(&self) -> u64 {
        self.acquire_timeout_secs
            .saturating_add(self.connect_timeout_secs)
            .saturating_add(self.query_timeout_secs.saturating_mul(ROUND_TRIPS_PER_REQUEST))
    }
}

/// Round trips of the busiest handler (`BEGIN`, rows, count, `COMMIT`).
pub const ROUND_TRIPS_PER_REQUEST: u64 = 4;

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on a whole request, body streaming excluded. Must exceed
    /// [`DatabaseConfig::worst_case_secs`].
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 150 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory served under `/static/`; `build/` below it under `/build/`.
    pub root: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: "static".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level when neither `RUST_LOG` nor `--verbose` is given.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
