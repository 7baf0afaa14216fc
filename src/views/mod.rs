//! Server-side views.
//!
//! # Responsibilities
//! - Name every renderable component
//! - Render a component with its props into an HTML fragment
//! - Render the shared page layout around a placeholder
//!
//! # Design Decisions
//! - Rendering is synchronous and pure; handlers never touch markup
//! - Templates are embedded at compile time and parsed once at startup
//! - The same renderer serves full page loads and client re-dispatch

pub mod engine;
mod format;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::request::Cookies;

pub use engine::TeraViews;

/// Every view the application can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    QueryResult,
    Database,
    Repl,
    Error,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::QueryResult,
        Component::Database,
        Component::Repl,
        Component::Error,
    ];

    pub fn template_name(self) -> &'static str {
        match self {
            Component::QueryResult => "query_result.html",
            Component::Database => "database.html",
            Component::Repl => "repl.html",
            Component::Error => "error.html",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("failed to render {component}: {source}")]
    Render {
        component: String,
        #[source]
        source: tera::Error,
    },
    #[error("failed to load templates: {0}")]
    Load(#[source] tera::Error),
}

/// Turns a component and its props into markup.
pub trait ViewRenderer: Send + Sync {
    /// Render `component` as an HTML fragment.
    fn render(&self, component: Component, props: &Value, cookies: &Cookies)
        -> Result<String, ViewError>;

    /// Render the page shell with `placeholder` where the content goes.
    fn render_layout(&self, props: &Value, placeholder: &str) -> Result<String, ViewError>;
}
