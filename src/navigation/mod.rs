//! In-process navigation over the same route table the server uses.
//!
//! # Data Flow
//! ```text
//! href (link click, history pop)
//!     → Location (parsed like a request target)
//!     → RouteTable::match_route(GET, pathname)
//!     → invoke (same error and panic handling as the server)
//!     → View payload: render the fragment, mount it, push history
//!     → Redirect payload: start over at the new location
//! ```
//!
//! # Design Decisions
//! - Fragments are mounted without the page shell
//! - Only view and redirect payloads can be navigated to

use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::http::invoke::invoke;
use crate::http::payload::PayloadBody;
use crate::http::request::{parse_target, Cookies, NormalizedRequest, Query, RequestError};
use crate::routing::RouteTable;
use crate::views::{Component, ViewError, ViewRenderer};

/// Redirects followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error(transparent)]
    Location(#[from] RequestError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("{path} answered with a {kind} payload, which cannot be mounted")]
    NotAView { path: String, kind: &'static str },
    #[error("too many redirects starting at {0}")]
    TooManyRedirects(String),
}

/// A parsed navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub pathname: String,
    pub query: Query,
    pub fragment: Option<String>,
    href: String,
}

impl Location {
    pub fn parse(href: &str) -> Result<Self, RequestError> {
        let target = parse_target(href)?;
        Ok(Self {
            pathname: target.pathname,
            query: target.query,
            fragment: target.fragment,
            href: href.to_string(),
        })
    }

    pub fn href(&self) -> &str {
        &self.href
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}

/// Locations visited, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<Location>,
}

impl History {
    pub fn push(&mut self, location: Location) {
        self.entries.push(location);
    }

    pub fn current(&self) -> Option<&Location> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[Location] {
        &self.entries
    }
}

/// Where rendered fragments go.
pub trait Mount {
    fn mount(&mut self, component: Component, html: String);
}

/// Keeps the last mounted fragment in memory.
#[derive(Debug, Default)]
pub struct MemoryMount {
    pub component: Option<Component>,
    pub html: String,
    pub mounts: usize,
}

impl Mount for MemoryMount {
    fn mount(&mut self, component: Component, html: String) {
        self.component = Some(component);
        self.html = html;
        self.mounts += 1;
    }
}

pub struct Navigator {
    routes: Arc<RouteTable>,
    views: Arc<dyn ViewRenderer>,
    history: History,
}

impl Navigator {
    pub fn new(routes: Arc<RouteTable>, views: Arc<dyn ViewRenderer>) -> Self {
        Self {
            routes,
            views,
            history: History::default(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Resolve `href` to a view and mount it, following redirects.
    pub async fn navigate(
        &mut self,
        href: &str,
        cookies: &Cookies,
        mount: &mut dyn Mount,
    ) -> Result<Component, NavigationError> {
        let result = self.resolve(href, cookies, mount).await;
        if let Err(error) = &result {
            tracing::warn!(href = %href, error = %error, "Navigation failed");
        }
        result
    }

    async fn resolve(
        &mut self,
        href: &str,
        cookies: &Cookies,
        mount: &mut dyn Mount,
    ) -> Result<Component, NavigationError> {
        let mut target = href.to_string();

        for _ in 0..=MAX_REDIRECTS {
            let location = Location::parse(&target)?;
            let matched = self.routes.match_route(&Method::GET, &location.pathname);

            let mut request = NormalizedRequest::new(Method::GET, location.pathname.clone());
            request.query = location.query.clone();
            request.cookies = cookies.clone();
            request.params = matched.params;

            let payload = invoke(matched.route, Arc::new(request)).await;
            match payload.body {
                PayloadBody::View { component, props } => {
                    let html = self.views.render(component, &props, cookies)?;
                    mount.mount(component, html);
                    tracing::debug!(location = %location, component = %component, "Mounted view");
                    self.history.push(location);
                    return Ok(component);
                }
                PayloadBody::Redirect(next) => {
                    tracing::debug!(from = %location, to = %next, "Following redirect");
                    target = next;
                }
                other => {
                    return Err(NavigationError::NotAView {
                        path: location.pathname,
                        kind: other.kind(),
                    })
                }
            }
        }

        Err(NavigationError::TooManyRedirects(href.to_string()))
    }
}
