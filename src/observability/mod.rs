//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch, pg, assets:
//!     → logging.rs (structured log events, request ids from tower-http)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` always wins over configured levels
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
