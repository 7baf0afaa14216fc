//! Handler invocation.
//!
//! # Responsibilities
//! - Call the matched route's handler exactly once
//! - Turn handler errors and panics into the 400 error payload
//!
//! # Design Decisions
//! - [`invoke`] always resolves to a payload; the renderer never sees a raw error
//! - No retries: at-most-once semantics per request

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::FutureExt;

use crate::app::rpc::RpcError;
use crate::http::payload::{ErrorProps, ResponsePayload};
use crate::http::request::NormalizedRequest;
use crate::pg::DbError;
use crate::routing::Route;

/// Failure reported by a route handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("missing request body")]
    MissingBody,
    #[error("invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("failed to serialize props: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    pub fn message(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}

/// Call `route`'s handler. Never fails: errors become a 400 error payload.
pub async fn invoke(route: &Route, request: Arc<NormalizedRequest>) -> ResponsePayload {
    let future = (route.handler())(request);

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(payload)) => payload,
        Ok(Err(error)) => {
            tracing::debug!(route = %route.pattern(), error = %error, "Handler failed");
            ResponsePayload::from_error(StatusCode::BAD_REQUEST, &error)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(route = %route.pattern(), panic = %message, "Handler panicked");
            ResponsePayload::error(
                StatusCode::BAD_REQUEST,
                ErrorProps {
                    stack: Some(format!("Error: {message}\n    at handler for {}", route.pattern())),
                    message,
                },
            )
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::payload::PayloadBody;
    use crate::views::Component;
    use axum::http::Method;

    fn request() -> Arc<NormalizedRequest> {
        Arc::new(NormalizedRequest::new(Method::GET, "/pg/acme/orders"))
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let route = Route::get("/pg/:database/:table", |_req| async {
            Ok(ResponsePayload::redirect("/pg/"))
        })
        .unwrap();
        let payload = invoke(&route, request()).await;
        assert_eq!(payload.status, StatusCode::FOUND);
        assert!(matches!(payload.body, PayloadBody::Redirect(_)));
    }

    #[tokio::test]
    async fn test_error_becomes_400_error_view() {
        let route = Route::get("/pg/:database/:table", |_req| async {
            Err(HandlerError::message("relation \"orders\" does not exist"))
        })
        .unwrap();

        let first = invoke(&route, request()).await;
        let second = invoke(&route, request()).await;

        assert_eq!(first.status, StatusCode::BAD_REQUEST);
        assert_eq!(first.component(), Some(Component::Error));
        assert_eq!(first.props().unwrap()["message"], "relation \"orders\" does not exist");
        // equivalent inputs yield equivalent payloads
        assert_eq!(first.props(), second.props());
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_panic_becomes_400_error_view() {
        let route = Route::get("/boom", |_req| async {
            if true {
                panic!("kaboom");
            }
            Ok(ResponsePayload::empty())
        })
        .unwrap();
        let payload = invoke(&route, request()).await;
        assert_eq!(payload.status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.props().unwrap()["message"], "kaboom");
    }

    #[tokio::test]
    async fn test_handler_sees_request() {
        let route = Route::get("/pg/:database/:table", |req: Arc<NormalizedRequest>| async move {
            ResponsePayload::json(&serde_json::json!({ "path": req.pathname }))
                .map_err(HandlerError::Serialize)
        })
        .unwrap();
        let payload = invoke(&route, request()).await;
        assert_eq!(payload.props().unwrap()["path"], "/pg/acme/orders");
    }
}
