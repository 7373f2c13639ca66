//! # Transport Abstraction
//!
//! Every backend call goes through a [`Transport`]. Behaviour is layered on
//! with decorators rather than by patching the HTTP client.
//!
//! ## Decorator Stacks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  REMOTE mode                        LOCAL mode                          │
//! │  ───────────                        ──────────                          │
//! │  FallbackTransport                  LocalTransport (interceptor)        │
//! │       │  5xx → cached envelope           │  table GET  → cache          │
//! │       │  no response → flag + rethrow    │  table write → cache+outbox  │
//! │       ▼                                  │  anything else ↓             │
//! │  AuthTransport                      AuthTransport                       │
//! │       │  apikey + Bearer                 │                              │
//! │       ▼                                  ▼                              │
//! │  HttpTransport (reqwest)            HttpTransport (reqwest)             │
//! │                                                                         │
//! │  The mode controller rebuilds the outer layer from the shared           │
//! │  Auth+Http base on every apply, so layers never stack.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use farmshop_core::table::record_id_segment;
use farmshop_core::{Operation, Record, ResponseEnvelope, RECORD_ID_FIELD};

use crate::error::{SyncError, SyncResult};

/// Header marking responses that were answered locally.
pub const SOURCE_HEADER: &str = "x-farmshop-source";

// =============================================================================
// Request / Response
// =============================================================================

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Request {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// The request replaying a write against a table URL.
    pub fn for_operation(operation: Operation, url: impl Into<String>, payload: &Record) -> Self {
        let method = match operation {
            Operation::Insert => Method::POST,
            Operation::Update => Method::PATCH,
            Operation::Delete => Method::DELETE,
        };

        let request = Self::new(method, url);
        match operation {
            Operation::Delete => request,
            _ => request.with_body(Value::Object(payload.clone())),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The write this request performs, `None` for reads.
    pub fn operation(&self) -> Option<Operation> {
        Operation::from_http_method(self.method.as_str())
    }

    /// The record a write carries.
    ///
    /// The JSON body when it is an object; the id segment of the URL fills
    /// in a missing `id`.
    pub fn write_payload(&self) -> Record {
        let mut payload = match &self.body {
            Some(Value::Object(map)) => map.clone(),
            _ => Record::new(),
        };

        if !payload.contains_key(RECORD_ID_FIELD) {
            if let Some(id) = record_id_segment(&self.url) {
                payload.insert(RECORD_ID_FIELD.to_string(), Value::String(id.to_string()));
            }
        }

        payload
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The backend answered.
    Remote,
    /// The local-mode interceptor answered.
    Local,
    /// A failed backend call was replaced with cached data.
    Fallback,
}

impl ResponseSource {
    fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Remote => "remote",
            ResponseSource::Local => "local",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// An HTTP response with a parsed JSON body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Response {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Response {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// A 200 carrying an envelope produced on this device.
    pub fn synthetic(envelope: &ResponseEnvelope, source: ResponseSource) -> Self {
        let mut response = Self::new(StatusCode::OK, envelope.to_value());
        response.headers.insert(
            HeaderName::from_static(SOURCE_HEADER),
            HeaderValue::from_static(source.as_str()),
        );
        response
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn source(&self) -> ResponseSource {
        match self.headers.get(SOURCE_HEADER).and_then(|v| v.to_str().ok()) {
            Some("local") => ResponseSource::Local,
            Some("fallback") => ResponseSource::Fallback,
            _ => ResponseSource::Remote,
        }
    }

    /// Rows carried by the body (envelope or bare array).
    ///
    /// Rows that aren't JSON objects are dropped with a warning.
    pub fn envelope(&self) -> ResponseEnvelope {
        let envelope = ResponseEnvelope::from_body(&self.body);

        let dropped = ResponseEnvelope::raw_rows(&self.body).len() - envelope.data.len();
        if dropped > 0 {
            warn!(dropped, kept = envelope.data.len(), "Dropped non-object rows from response");
        }
        envelope
    }

    /// Converts a non-success status into an error.
    pub fn error_for_status(self) -> SyncResult<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let message = self
            .body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.status.canonical_reason().map(str::to_string))
            .unwrap_or_default();

        Err(SyncError::http(self.status.as_u16(), message))
    }
}

// =============================================================================
// Transport trait
// =============================================================================

/// A decorator layer, reported by [`Transport::layers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Auth,
    Fallback,
    LocalInterceptor,
}

/// Sends a request and returns the response.
///
/// Implementations return `Ok` for every response that arrived, whatever
/// its status; `Err` means no usable response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> SyncResult<Response>;

    /// Decorator layers from outermost to innermost.
    fn layers(&self) -> Vec<Layer> {
        Vec::new()
    }

    fn has_layer(&self, layer: Layer) -> bool {
        self.layers().contains(&layer)
    }
}

// =============================================================================
// HTTP transport
// =============================================================================

/// The bottom of every stack: a real HTTP call via reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {}", e)))?;

        Ok(HttpTransport { client, timeout })
    }

    fn map_send_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_secs())
        } else {
            SyncError::from(err)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> SyncResult<Response> {
        debug!(method = %request.method, url = %request.url, "HTTP request");

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        debug!(status = status.as_u16(), "HTTP response");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_payload_takes_id_from_path() {
        let request = Request::new(Method::PATCH, "https://b.example.com/tables/orders/o-7")
            .with_body(json!({ "status": "packed" }));

        let payload = request.write_payload();
        assert_eq!(payload["id"], json!("o-7"));
        assert_eq!(payload["status"], json!("packed"));
        assert_eq!(request.operation(), Some(Operation::Update));
    }

    #[test]
    fn test_write_payload_keeps_body_id() {
        let request = Request::new(Method::PUT, "https://b.example.com/tables/orders/o-7")
            .with_body(json!({ "id": "o-8" }));
        assert_eq!(request.write_payload()["id"], json!("o-8"));
        assert_eq!(Request::get("https://b.example.com/tables/orders").operation(), None);
    }

    #[test]
    fn test_for_operation_drops_body_on_delete() {
        let payload = json!({ "id": "o-1" }).as_object().cloned().unwrap();

        let delete = Request::for_operation(Operation::Delete, "u", &payload);
        assert_eq!(delete.method, Method::DELETE);
        assert!(delete.body.is_none());

        let insert = Request::for_operation(Operation::Insert, "u", &payload);
        assert_eq!(insert.method, Method::POST);
        assert_eq!(insert.body, Some(json!({ "id": "o-1" })));
    }

    #[test]
    fn test_synthetic_response_source() {
        let envelope = ResponseEnvelope::empty("cached");
        let response = Response::synthetic(&envelope, ResponseSource::Fallback);

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.source(), ResponseSource::Fallback);
        assert_eq!(
            Response::new(StatusCode::OK, Value::Null).source(),
            ResponseSource::Remote
        );
    }

    #[test]
    fn test_error_for_status() {
        let response = Response::new(StatusCode::UNPROCESSABLE_ENTITY, json!({ "message": "bad phone" }));
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert!(err.to_string().contains("bad phone"));
    }

    #[test]
    fn test_envelope_drops_non_object_rows() {
        let response = Response::new(StatusCode::OK, json!([{ "id": "o-1" }, 7, "x", { "id": "o-2" }]));
        let envelope = response.envelope();

        assert_eq!(ResponseEnvelope::raw_rows(&response.body).len(), 4);
        assert_eq!(envelope.data.len(), 2);
        assert_eq!(envelope.data[1]["id"], json!("o-2"));
    }
}
