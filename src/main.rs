//! sysadmin: browse PostgreSQL metadata and run SQL from the browser.
//!
//! # Architecture Overview
//!
//! ```text
//!     Browser ──▶ http::server ──▶ http::request ──▶ routing::RouteTable
//!                                                        │
//!                                                        ▼
//!     Browser ◀── http::response ◀── http::invoke ◀── app::handlers ──▶ pg ──▶ Postgres
//!                      │
//!                      └── views (tera): full page, or JSON for XHR callers
//!
//!     navigation: same route table and handlers, fragments mounted in-process
//! ```

use clap::Parser;

use sysadmin::config::{load_config, AppConfig, Cli};
use sysadmin::lifecycle;
use sysadmin::observability::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);

    logging::init(&config.observability, cli.verbose)?;
    tracing::info!("sysadmin v{} starting", env!("CARGO_PKG_VERSION"));

    lifecycle::run(config).await?;
    Ok(())
}
