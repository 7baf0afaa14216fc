//! Response rendering.
//!
//! # Responsibilities
//! - Apply status and headers before any body is chosen
//! - Pick exactly one body strategy per payload kind
//! - Wrap view fragments in the page layout for browsers
//! - Turn render failures into a plain-text 500
//!
//! # Design Decisions
//! - Branching is an exhaustive `match` over [`PayloadBody`]
//! - XHR callers never receive HTML, only JSON of the props
//! - Stream errors after the status line is committed abort the body

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use crate::http::payload::{error_chain, PayloadBody, ResponsePayload};
use crate::http::request::NormalizedRequest;
use crate::views::{ViewError, ViewRenderer};

/// Marker the layout is rendered around before the fragment is spliced in.
pub const PLACEHOLDER: &str = "#yield#";

const DOCTYPE: &str = "<!DOCTYPE html>";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("invalid header name `{name}`: {source}")]
    HeaderName {
        name: String,
        #[source]
        source: InvalidHeaderName,
    },
    #[error("invalid value for header `{name}`: {source}")]
    HeaderValue {
        name: String,
        #[source]
        source: InvalidHeaderValue,
    },
    #[error("failed to serialize props: {0}")]
    Json(#[source] serde_json::Error),
}

/// Write `payload` for `request`. Never fails: render errors become a 500.
pub fn render(
    views: &dyn ViewRenderer,
    request: &NormalizedRequest,
    payload: ResponsePayload,
) -> Response {
    match try_render(views, request, payload) {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(path = %request.pathname, error = %error, "Render failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                error_chain(&error),
            )
                .into_response()
        }
    }
}

fn try_render(
    views: &dyn ViewRenderer,
    request: &NormalizedRequest,
    payload: ResponsePayload,
) -> Result<Response, RenderError> {
    let ResponsePayload {
        body,
        status,
        headers,
    } = payload;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    for (name, value) in &headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|source| RenderError::HeaderName {
                name: name.clone(),
                source,
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|source| RenderError::HeaderValue {
                name: name.clone(),
                source,
            })?;
        response.headers_mut().append(header_name, header_value);
    }

    match body {
        PayloadBody::Stream(stream) => {
            let pathname = request.pathname.clone();
            let stream = stream.inspect(move |chunk| {
                if let Err(error) = chunk {
                    tracing::warn!(path = %pathname, error = %error, "Stream aborted");
                }
            });
            *response.body_mut() = Body::from_stream(stream);
        }
        PayloadBody::View { component, props } if !request.is_xhr => {
            let fragment = views.render(component, &props, &request.cookies)?;
            let layout = views.render_layout(&props, PLACEHOLDER)?;
            let html = format!("{DOCTYPE}{}", layout.replacen(PLACEHOLDER, &fragment, 1));
            set_content_type(&mut response, TEXT_HTML);
            *response.body_mut() = Body::from(html);
        }
        PayloadBody::View { props, .. } | PayloadBody::Json(props) => {
            let json = serde_json::to_vec(&props).map_err(RenderError::Json)?;
            set_content_type(&mut response, APPLICATION_JSON);
            *response.body_mut() = Body::from(json);
        }
        PayloadBody::Redirect(location) => {
            let value = HeaderValue::from_str(&location).map_err(|source| {
                RenderError::HeaderValue {
                    name: header::LOCATION.to_string(),
                    source,
                }
            })?;
            response.headers_mut().insert(header::LOCATION, value);
        }
        PayloadBody::Empty => {}
    }

    Ok(response)
}

fn set_content_type(response: &mut Response, value: &'static str) {
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
}
