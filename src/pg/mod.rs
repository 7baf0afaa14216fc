//! PostgreSQL access.
//!
//! # Data Flow
//! ```text
//! handler / RPC registry
//!     → api.rs (build SQL, pick the target's pool)
//!     → pool.rs (check out a connection under the acquire deadline)
//!     → value.rs (bind text parameters, decode rows to JSON)
//!     → types.rs (QueryResult, Relation, ...)
//! ```
//!
//! # Design Decisions
//! - One bounded pool per distinct connection target
//! - Every round trip has a deadline; a missed deadline cancels server-side
//! - A connection that saw an error is never reused

pub mod api;
mod error;
pub mod pool;
pub mod types;
pub mod value;

pub use api::PgApi;
pub use error::DbError;
pub use pool::PoolSettings;
pub use types::{
    Attribute, ConnectionConfig, ConnectionParams, Constraint, Field, QueryResult, Relation, Row,
};
