//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → request.rs (body, negotiation, URL, cookies → NormalizedRequest)
//!     → [routing::RouteTable picks the route and captures params]
//!     → invoke.rs (run handler, errors and panics → 400 payload)
//!     → payload.rs (what to send)
//!     → response.rs (how to send it: stream, HTML page, JSON, redirect)
//!     → Send to client
//! ```

pub mod invoke;
pub mod payload;
pub mod request;
pub mod response;
pub mod server;

pub use invoke::HandlerError;
pub use payload::{ErrorProps, PayloadBody, ResponsePayload};
pub use request::NormalizedRequest;
pub use server::{AppState, HttpServer};
