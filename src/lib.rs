//! PostgreSQL metadata browser and SQL console.

// Core request path
pub mod http;
pub mod navigation;
pub mod routing;
pub mod views;

// Application
pub mod app;
pub mod pg;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
