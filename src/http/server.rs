//! HTTP server setup and the dispatch loop.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-everything handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Run every request through normalize → match → invoke → render
//! - Log and count each completed request
//! - Drain in-flight requests on shutdown
//!
//! # Design Decisions
//! - Axum only provides transport; route selection lives in [`RouteTable`]
//! - A pipeline failure skips matching and renders a 400 error payload

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::invoke::invoke;
use crate::http::payload::ResponsePayload;
use crate::http::request::{normalize, PipelineFailure};
use crate::http::response::render;
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::views::ViewRenderer;

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub views: Arc<dyn ViewRenderer>,
    pub max_body_bytes: usize,
}

/// HTTP server for the application route table.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, request_timeout: Duration) -> Self {
        Self {
            router: Self::build_router(state, request_timeout),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(request_timeout)),
            )
    }

    /// The fully layered router, for in-process callers.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Normalize, match, invoke, render.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    let response = match normalize(&parts, body, state.max_body_bytes).await {
        Ok(mut normalized) => {
            let matched = state
                .routes
                .match_route(&normalized.method, &normalized.pathname);
            tracing::debug!(
                method = %normalized.method,
                path = %normalized.pathname,
                route = matched.route.pattern(),
                "Route matched"
            );
            normalized.params = matched.params;
            let normalized = Arc::new(normalized);
            let payload = invoke(matched.route, Arc::clone(&normalized)).await;
            render(state.views.as_ref(), &normalized, payload)
        }
        Err(PipelineFailure { request, error }) => {
            tracing::warn!(
                method = %parts.method,
                uri = %parts.uri,
                error = %error,
                "Request rejected"
            );
            let payload = ResponsePayload::from_error(StatusCode::BAD_REQUEST, &error);
            render(state.views.as_ref(), &request, payload)
        }
    };

    let status = response.status().as_u16();
    tracing::info!(
        method = %parts.method,
        uri = %parts.uri,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "{} {} {}",
        parts.method,
        parts.uri,
        status
    );
    metrics::record_request(parts.method.as_str(), status, started);
    response
}
