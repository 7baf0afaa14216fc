//! Resilience subsystem.
//!
//! # Design Decisions
//! - Every external round trip has a deadline
//! - A missed deadline is an ordinary error value, handled like any other failure
//! - No retries: handlers run at most once per request

pub mod timeouts;

pub use timeouts::{with_deadline, DeadlineExceeded};
