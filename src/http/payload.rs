//! Handler results.
//!
//! A [`ResponsePayload`] is a closed description of what to send back. The
//! body kind is an enum so the renderer's branching is checked exhaustively.

use std::fmt;
use std::io;
use std::pin::Pin;

use axum::body::Bytes;
use axum::http::StatusCode;
use futures_util::Stream;
use serde::Serialize;
use serde_json::{json, Value};

use crate::views::Component;

/// Byte source piped straight to the client.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// The body kind of a payload. Exactly one per payload.
pub enum PayloadBody {
    /// Raw bytes, piped as-is.
    Stream(ByteStream),
    /// A view; full HTML for browsers, JSON of `props` for XHR callers.
    View { component: Component, props: Value },
    /// Data with no view (API endpoints).
    Json(Value),
    /// Navigate elsewhere (`Location` header).
    Redirect(String),
    /// Nothing beyond status and headers.
    Empty,
}

impl PayloadBody {
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadBody::Stream(_) => "stream",
            PayloadBody::View { .. } => "view",
            PayloadBody::Json(_) => "json",
            PayloadBody::Redirect(_) => "redirect",
            PayloadBody::Empty => "empty",
        }
    }
}

impl fmt::Debug for PayloadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadBody::Stream(_) => f.write_str("Stream(..)"),
            PayloadBody::View { component, props } => f
                .debug_struct("View")
                .field("component", component)
                .field("props", props)
                .finish(),
            PayloadBody::Json(props) => f.debug_tuple("Json").field(props).finish(),
            PayloadBody::Redirect(location) => f.debug_tuple("Redirect").field(location).finish(),
            PayloadBody::Empty => f.write_str("Empty"),
        }
    }
}

/// Props of the error view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorProps {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// What a handler produced: body kind, status and extra headers.
#[derive(Debug)]
pub struct ResponsePayload {
    pub body: PayloadBody,
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
}

impl ResponsePayload {
    fn with_body(body: PayloadBody) -> Self {
        Self {
            body,
            status: StatusCode::OK,
            headers: Vec::new(),
        }
    }

    pub fn stream(stream: ByteStream) -> Self {
        Self::with_body(PayloadBody::Stream(stream))
    }

    pub fn view<P: Serialize>(component: Component, props: &P) -> Result<Self, serde_json::Error> {
        Ok(Self::with_body(PayloadBody::View {
            component,
            props: serde_json::to_value(props)?,
        }))
    }

    pub fn json<P: Serialize>(props: &P) -> Result<Self, serde_json::Error> {
        Ok(Self::with_body(PayloadBody::Json(serde_json::to_value(props)?)))
    }

    /// Redirect with the default 302.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::with_body(PayloadBody::Redirect(location.into())).status(StatusCode::FOUND)
    }

    pub fn empty() -> Self {
        Self::with_body(PayloadBody::Empty)
    }

    /// The error view with `{message, stack}` props.
    pub fn error(status: StatusCode, props: ErrorProps) -> Self {
        let props = json!(props);
        Self::with_body(PayloadBody::View {
            component: Component::Error,
            props,
        })
        .status(status)
    }

    /// Error payload for a failure, `stack` being its source chain.
    pub fn from_error(status: StatusCode, error: &(dyn std::error::Error + 'static)) -> Self {
        Self::error(
            status,
            ErrorProps {
                message: error.to_string(),
                stack: Some(error_chain(error)),
            },
        )
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Props carried by view and JSON payloads.
    pub fn props(&self) -> Option<&Value> {
        match &self.body {
            PayloadBody::View { props, .. } | PayloadBody::Json(props) => Some(props),
            _ => None,
        }
    }

    pub fn component(&self) -> Option<Component> {
        match &self.body {
            PayloadBody::View { component, .. } => Some(*component),
            _ => None,
        }
    }
}

/// Render an error and its sources, one per line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = format!("Error: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(&format!("\n    caused by: {cause}"));
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_redirect_defaults_to_302() {
        let payload = ResponsePayload::redirect("/pg/");
        assert_eq!(payload.status, StatusCode::FOUND);
        assert!(matches!(payload.body, PayloadBody::Redirect(ref l) if l == "/pg/"));
    }

    #[test]
    fn test_error_payload_props() {
        let err = Outer(io::Error::other("disk on fire"));
        let payload = ResponsePayload::from_error(StatusCode::BAD_REQUEST, &err);
        assert_eq!(payload.status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.component(), Some(Component::Error));

        let props = payload.props().unwrap();
        assert_eq!(props["message"], "outer failure");
        let stack = props["stack"].as_str().unwrap();
        assert!(stack.contains("outer failure"));
        assert!(stack.contains("caused by: disk on fire"));
    }

    #[test]
    fn test_headers_accumulate_in_order() {
        let payload = ResponsePayload::empty()
            .header("Content-Range", "orders 0-10/42")
            .header("X-Extra", "1");
        assert_eq!(
            payload.headers,
            vec![
                ("Content-Range".to_string(), "orders 0-10/42".to_string()),
                ("X-Extra".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(payload.body.kind(), "empty");
    }
}
