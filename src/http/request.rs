//! Request normalization.
//!
//! # Responsibilities
//! - Read the body as JSON, or as a form when it is form-encoded
//! - Decide whether the caller wants JSON instead of HTML
//! - Parse the request target into pathname and query mapping
//! - Parse cookies
//!
//! # Design Decisions
//! - Stages run strictly in order; the first failure skips the rest
//! - Content negotiation is a pure function of headers and path, so error
//!   responses can still be formatted for the caller
//! - A fresh [`NormalizedRequest`] per request, never shared across requests

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{header, request::Parts, HeaderMap, Method};
use percent_encoding::percent_decode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::routing::Params;

/// Suffix that marks a machine-readable request; stripped before matching.
pub const JSON_SUFFIX: &str = ".json";

const URL_BASE: &str = "http://localhost/";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),
    #[error("request body is not valid JSON: {0}")]
    BodyJson(#[source] serde_json::Error),
    #[error("form body is not valid UTF-8")]
    BodyForm,
    #[error("malformed URL `{target}`: {source}")]
    MalformedUrl {
        target: String,
        #[source]
        source: url::ParseError,
    },
    #[error("malformed query string: `{0}` is not valid percent-encoded UTF-8")]
    MalformedQuery(String),
}

/// A query string value: repeated keys collect into a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// The first value.
    pub fn first(&self) -> &str {
        match self {
            QueryValue::One(v) => v,
            QueryValue::Many(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            QueryValue::One(v) => vec![v.clone()],
            QueryValue::Many(vs) => vs.clone(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::One(first) => *self = QueryValue::Many(vec![std::mem::take(first), value]),
            QueryValue::Many(vs) => vs.push(value),
        }
    }
}

pub type Query = BTreeMap<String, QueryValue>;
pub type Cookies = BTreeMap<String, String>;

/// The logical request handed to route handlers.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub method: Method,
    pub pathname: String,
    pub query: Query,
    pub body: Option<Value>,
    pub cookies: Cookies,
    /// True when the caller wants JSON rather than a full HTML page.
    pub is_xhr: bool,
    /// Filled from the matched route pattern.
    pub params: Params,
}

impl NormalizedRequest {
    /// An empty request for `method` and `pathname`; stages fill in the rest.
    pub fn new(method: Method, pathname: impl Into<String>) -> Self {
        Self {
            method,
            pathname: pathname.into(),
            query: Query::new(),
            body: None,
            cookies: Cookies::new(),
            is_xhr: false,
            params: Params::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query_first(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(QueryValue::first)
    }
}

/// A pipeline failure plus whatever had been normalized before it.
#[derive(Debug)]
pub struct PipelineFailure {
    pub request: NormalizedRequest,
    pub error: RequestError,
}

/// Run every normalization stage in order.
pub async fn normalize(
    parts: &Parts,
    body: Body,
    max_body_bytes: usize,
) -> Result<NormalizedRequest, PipelineFailure> {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut request = NormalizedRequest::new(parts.method.clone(), parts.uri.path());

    let fail = |mut request: NormalizedRequest, error: RequestError| {
        // negotiation cannot fail; keep it so the error is formatted for the caller
        request.is_xhr = wants_json(&parts.headers, parts.uri.path());
        PipelineFailure { request, error }
    };

    // 1. body
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    match read_body(body, content_type, max_body_bytes).await {
        Ok(body) => request.body = body,
        Err(error) => return Err(fail(request, error)),
    }

    // 2. content negotiation
    request.is_xhr = wants_json(&parts.headers, parts.uri.path());

    // 3. URL
    match parse_target(target) {
        Ok(parsed) => {
            request.pathname = strip_json_suffix(&parsed.pathname).to_string();
            request.query = parsed.query;
        }
        Err(error) => return Err(fail(request, error)),
    }

    // 4. cookies
    request.cookies = parse_cookies(&parts.headers);

    Ok(request)
}

/// Read the whole body and parse it if it is not blank.
///
/// A form-encoded body becomes a JSON object of its fields; anything else is
/// parsed as JSON.
pub async fn read_body(
    body: Body,
    content_type: Option<&str>,
    limit: usize,
) -> Result<Option<Value>, RequestError> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(RequestError::BodyRead)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if content_type.is_some_and(is_form) {
        let raw = std::str::from_utf8(&bytes).map_err(|_| RequestError::BodyForm)?;
        let form = parse_query(raw.trim())?;
        return serde_json::to_value(form)
            .map(Some)
            .map_err(RequestError::BodyJson);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(RequestError::BodyJson)
}

fn is_form(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .eq_ignore_ascii_case(FORM_CONTENT_TYPE)
}

/// Whether the caller wants a machine-readable response.
pub fn wants_json(headers: &HeaderMap, path: &str) -> bool {
    let requested_with = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    if requested_with || path.ends_with(JSON_SUFFIX) {
        return true;
    }

    match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        Some(accept) if !accept.trim().is_empty() => !accept_allows_html(accept),
        _ => false,
    }
}

fn accept_allows_html(accept: &str) -> bool {
    accept.split(',').any(|range| {
        let media = range.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        matches!(media.as_str(), "text/html" | "text/*" | "*/*")
    })
}

fn strip_json_suffix(pathname: &str) -> &str {
    match pathname.strip_suffix(JSON_SUFFIX) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => pathname,
    }
}

/// A request target split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// Still percent-encoded, dot segments resolved.
    pub pathname: String,
    pub query: Query,
    pub fragment: Option<String>,
}

/// Parse an origin-form target such as `/pg/acme/repl/?sql=select+1#top`.
pub fn parse_target(target: &str) -> Result<ParsedTarget, RequestError> {
    let malformed = |source| RequestError::MalformedUrl {
        target: target.to_string(),
        source,
    };
    let base = Url::parse(URL_BASE).map_err(malformed)?;
    let url = base.join(target).map_err(malformed)?;

    Ok(ParsedTarget {
        pathname: url.path().to_string(),
        query: parse_query(url.query().unwrap_or(""))?,
        fragment: url.fragment().map(str::to_string),
    })
}

/// Form-decode a query string. Repeated keys become a list.
pub fn parse_query(raw: &str) -> Result<Query, RequestError> {
    let mut query = Query::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = form_decode(key)?;
        let value = form_decode(value)?;
        match query.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                query.insert(key, QueryValue::One(value));
            }
        }
    }
    Ok(query)
}

fn form_decode(raw: &str) -> Result<String, RequestError> {
    let spaced = raw.replace('+', " ");
    percent_decode(spaced.as_bytes())
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| RequestError::MalformedQuery(raw.to_string()))
}

/// Flatten every `Cookie` header into a map; the last duplicate wins.
pub fn parse_cookies(headers: &HeaderMap) -> Cookies {
    let mut cookies = Cookies::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            let pair = pair.trim();
            let Some((name, raw)) = pair.split_once('=') else { continue };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let decoded = percent_decode(raw.trim().as_bytes()).decode_utf8_lossy();
            cookies.insert(name.to_string(), decoded.into_owned());
        }
    }
    cookies
}
