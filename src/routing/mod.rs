//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, pathname)
//!     → table.rs (ordered route lookup)
//!     → pattern.rs (segment-by-segment match, parameter capture)
//!     → Return: Match { route, params }
//!
//! Route Compilation (at startup):
//!     Vec<Route>
//!     → Parse patterns into segments
//!     → Split off the trailing catch-all
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime (shared via Arc, no locks)
//! - Deterministic: same input always matches same route
//! - First match wins (declaration order)
//! - The catch-all is mandatory, so lookup is total

pub mod pattern;
pub mod table;

pub use pattern::{Params, Pattern, PatternError, SPLAT};
pub use table::{Handler, HandlerFuture, Match, Route, RouteMethod, RouteTable, RouteTableError};
