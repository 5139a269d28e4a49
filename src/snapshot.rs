//! Normalized request/response views
//!
//! A snapshot is the immutable, already-redacted projection of one side of
//! the exchange, built exactly once at finalize time. The request side is
//! built from a tagged source: the facts the middleware captured off the
//! wire, or an enriched pre-parsed body published by a higher layer of the
//! application (preferred when present, since it reflects what the handler
//! actually saw).

use std::collections::HashSet;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{Map, Value};

use crate::redact::{redacted, HEADER_MASK};

/// Raw facts captured by the middleware before dispatch
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// Request method
    pub method: Method,
    /// Path component only, used by the skip policy
    pub path: String,
    /// Path plus query string, as received
    pub full_path: String,
    /// Query string without the leading `?`
    pub query: Option<String>,
    /// Request headers as received
    pub headers: HeaderMap,
    /// Buffered body; `None` when over the capture limit or unreadable
    pub body: Option<Bytes>,
}

impl CapturedRequest {
    /// Capture the request line and headers; the body is attached separately
    /// after buffering
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap) -> Self {
        let path = uri.path().to_string();
        let full_path = uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| path.clone());
        Self {
            method,
            path,
            full_path,
            query: uri.query().map(str::to_string),
            headers,
            body: None,
        }
    }

    fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Pre-parsed request body published by a request-processing layer
///
/// When an extractor or handler layer has already decoded the body, it can
/// expose the decoded value through this extension (on the request or the
/// response); the snapshot then prefers it over re-decoding raw bytes.
#[derive(Debug, Clone)]
pub struct ParsedBody(pub Value);

/// Immutable, redacted view of the request side of an exchange
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    /// Upper-case method name
    pub method: String,
    /// Path component only
    pub path: String,
    /// Path plus query string
    pub full_path: String,
    /// Redacted decoded body; an empty mapping when there is nothing to decode
    pub data: Value,
    /// Redacted query parameters
    pub query_params: Value,
    /// Request headers, secret names masked
    pub request_headers: Map<String, Value>,
}

impl RequestSnapshot {
    /// Build the view, preferring the enriched body when available
    pub fn build(
        captured: &CapturedRequest,
        enriched: Option<&ParsedBody>,
        secrets: &HashSet<String>,
    ) -> Self {
        let data = match enriched {
            Some(parsed) => redacted(parsed.0.clone(), secrets),
            None => redacted(decode_body(captured), secrets),
        };
        let query_params = redacted(
            parse_query(captured.query.as_deref().unwrap_or("")),
            secrets,
        );
        Self {
            method: captured.method.as_str().to_string(),
            path: captured.path.clone(),
            full_path: captured.full_path.clone(),
            data,
            query_params,
            request_headers: mask_headers(&captured.headers, secrets),
        }
    }
}

/// Immutable view of the response side of an exchange
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    /// Response status code
    pub status_code: u16,
    /// Structured response data: present only for JSON responses, redacted
    /// when the top level is a mapping
    pub data: Option<Value>,
}

impl ResponseSnapshot {
    /// Build the view from the buffered response
    pub fn build(
        status: StatusCode,
        content_type: Option<&str>,
        body: Option<&Bytes>,
        secrets: &HashSet<String>,
    ) -> Self {
        let data = body
            .filter(|_| content_type.is_some_and(is_json))
            .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok())
            .map(|value| match value {
                Value::Object(_) => redacted(value, secrets),
                other => other,
            });
        Self {
            status_code: status.as_u16(),
            data,
        }
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    essence == "application/json" || essence.ends_with("+json")
}

fn is_form(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim() == "application/x-www-form-urlencoded")
}

/// Decode the raw request body: JSON verbatim, urlencoded forms as a string
/// mapping, anything else (or nothing) as an empty mapping.
fn decode_body(captured: &CapturedRequest) -> Value {
    let Some(bytes) = captured.body.as_ref() else {
        return Value::Object(Map::new());
    };
    match captured.content_type() {
        Some(ct) if is_json(ct) => {
            serde_json::from_slice(bytes).unwrap_or_else(|_| Value::Object(Map::new()))
        }
        Some(ct) if is_form(ct) => {
            parse_query(std::str::from_utf8(bytes).unwrap_or_default())
        }
        _ => Value::Object(Map::new()),
    }
}

/// Parse a urlencoded pair list into a string mapping (last value wins)
fn parse_query(raw: &str) -> Value {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).unwrap_or_default();
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key, Value::String(value));
    }
    Value::Object(map)
}

/// Project headers into a string mapping, masking secret names.
///
/// Header names are lower-cased; secret membership is checked against the
/// lower-cased name. Non-UTF-8 values degrade to the lossy rendering.
fn mask_headers(headers: &HeaderMap, secrets: &HashSet<String>) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        let name = name.as_str().to_string();
        let rendered = if secrets.contains(&name) {
            HEADER_MASK.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        map.insert(name, Value::String(rendered));
    }
    map
}
