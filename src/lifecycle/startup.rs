//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start the metrics exporter and the idle connection sweeper
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Database connections are opened lazily, so startup never waits on Postgres

use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::app::{self, AppContext, AppError, Assets};
use crate::config::AppConfig;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::pg::PgApi;
use crate::views::{TeraViews, ViewError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Views(#[from] ViewError),
    #[error("invalid metrics address `{address}`: {source}")]
    MetricsAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },
    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] BuildError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Assemble the application described by `config` without binding anything.
pub fn build_server(config: &AppConfig) -> Result<HttpServer, StartupError> {
    build_app(config).map(|(server, _)| server)
}

fn build_app(config: &AppConfig) -> Result<(HttpServer, Arc<PgApi>), StartupError> {
    let api = Arc::new(PgApi::new(
        config.database.connection(),
        config.database.pool_settings(),
    ));
    let ctx = AppContext::new(Arc::clone(&api), Assets::new(&config.assets.root))?;
    let routes = app::routes(&ctx)?;
    tracing::debug!(routes = routes.len(), "Route table compiled");

    let state = AppState {
        routes: Arc::new(routes),
        views: Arc::new(TeraViews::new()?),
        max_body_bytes: config.limits.max_body_bytes,
    };
    let server = HttpServer::new(state, Duration::from_secs(config.timeouts.request_secs));
    Ok((server, api))
}

/// Close expired idle connections every `every` until shutdown.
pub fn spawn_idle_sweeper(
    api: Arc<PgApi>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let closed = api.evict_idle();
                    if closed > 0 {
                        tracing::debug!(closed, pools = api.pool_count(), "Closed idle connections");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

/// Run until SIGINT or SIGTERM.
pub async fn run(config: AppConfig) -> Result<(), StartupError> {
    tracing::info!(
        listen = %config.listener.address(),
        database = %config.database.connection(),
        assets = %config.assets.root,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address
            .parse()
            .map_err(|source| StartupError::MetricsAddress {
                address: address.clone(),
                source,
            })?;
        metrics::init_metrics(addr)?;
    }

    let (server, api) = build_app(&config)?;

    let address = config.listener.address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    spawn_idle_sweeper(
        api,
        config.database.pool_settings().idle_timeout,
        shutdown.subscribe(),
    );
    signals::spawn(shutdown);

    server.run(listener, receiver).await.map_err(StartupError::Serve)?;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_server_from_defaults() {
        assert!(build_server(&AppConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_bad_metrics_address_is_fatal() {
        let mut config = AppConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "not an address".to_string();
        let error = run(config).await.unwrap_err();
        assert!(matches!(error, StartupError::MetricsAddress { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweeper_stops_on_shutdown() {
        let (_, api) = build_app(&AppConfig::default()).unwrap();
        let shutdown = Shutdown::new();
        let sweeper = spawn_idle_sweeper(api, Duration::from_secs(1), shutdown.subscribe());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!sweeper.is_finished());
        shutdown.trigger();
        sweeper.await.unwrap();
    }
}
