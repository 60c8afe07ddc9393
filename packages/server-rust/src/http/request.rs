use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query, RawPathParams};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde_json::{Map, Value};
use svckit_core::ApiError;

use crate::context::ServiceContext;

/// Code used when a request body exceeds a size limit.
pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";

/// Builds the 413 error reported for oversized bodies.
#[track_caller]
#[must_use]
pub fn payload_too_large(limit: usize) -> ApiError {
    ApiError::new("Payload Too Large.")
        .with_status(413)
        .with_code(PAYLOAD_TOO_LARGE)
        .with_detail(format!("request body exceeds {limit} bytes"))
}

/// The request side of a route exchange.
///
/// `params`, `query` and `body` are plain JSON so validators and handlers
/// see the same shapes. `locals` carries per-request values between
/// middleware units.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    raw_body: Bytes,
    context: ServiceContext,
    /// Path parameters, always an object.
    pub params: Value,
    /// Query string values, always an object.
    pub query: Value,
    /// Parsed body; `None` until a parser fills it.
    pub body: Option<Value>,
    pub locals: Extensions,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        let query = query_from_uri(&uri);
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            raw_body: Bytes::new(),
            context: ServiceContext::default(),
            params: Value::Object(Map::new()),
            query,
            body: None,
            locals: Extensions::new(),
        }
    }

    /// Converts an axum request, buffering at most `limit` body bytes.
    ///
    /// The request is always produced; a body that could not be buffered is
    /// reported as the second value so it can enter the route's error slot.
    pub async fn from_axum(
        req: axum::extract::Request,
        context: ServiceContext,
        limit: usize,
    ) -> (Self, Option<ApiError>) {
        let (mut parts, body) = req.into_parts();

        let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
            Ok(raw) => raw
                .iter()
                .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
                .collect(),
            Err(_) => Map::new(),
        };

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());

        let (raw_body, failure) = if declared.is_some_and(|len| len > limit) {
            (Bytes::new(), Some(payload_too_large(limit)))
        } else {
            match axum::body::to_bytes(body, limit).await {
                Ok(bytes) => (bytes, None),
                Err(_) => (Bytes::new(), Some(payload_too_large(limit))),
            }
        };

        let mut request = Self::new(parts.method, parts.uri);
        request.headers = parts.headers;
        request.raw_body = raw_body;
        request.context = context;
        request.params = Value::Object(params);
        request.locals = parts.extensions;
        (request, failure)
    }

    #[must_use]
    pub fn with_context(mut self, context: ServiceContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    /// Sets an already parsed body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the raw body bytes, leaving parsing to the JSON parser.
    #[must_use]
    pub fn with_raw_body(mut self, raw: impl Into<Bytes>) -> Self {
        self.raw_body = raw.into();
        self
    }

    /// Sets a raw JSON body with a matching content type.
    #[must_use]
    pub fn with_json_text(self, text: &str) -> Self {
        self.with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_raw_body(Bytes::copy_from_slice(text.as_bytes()))
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text, if present and valid.
    #[must_use]
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    #[must_use]
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    #[must_use]
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Path parameter as text.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

fn query_from_uri(uri: &Uri) -> Value {
    let pairs = Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();
    Value::Object(
        pairs
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use serde_json::json;

    use super::*;

    #[test]
    fn query_is_parsed_from_uri() {
        let req = Request::new(Method::GET, "/cars?color=red&seats=4".parse().unwrap());
        assert_eq!(req.query, json!({"color": "red", "seats": "4"}));
        assert_eq!(req.params, json!({}));
        assert!(req.body.is_none());
    }

    #[tokio::test]
    async fn from_axum_buffers_body() {
        let raw = http::Request::builder()
            .method(Method::POST)
            .uri("/login?next=home")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"a@b.com"}"#))
            .unwrap();

        let (req, failure) = Request::from_axum(raw, ServiceContext::default(), 1024).await;
        assert!(failure.is_none());
        assert_eq!(*req.method(), Method::POST);
        assert_eq!(req.path(), "/login");
        assert_eq!(req.query["next"], "home");
        assert_eq!(req.header(CONTENT_TYPE), Some("application/json"));
        assert_eq!(req.raw_body().as_ref(), br#"{"email":"a@b.com"}"#);
    }

    #[tokio::test]
    async fn from_axum_reports_oversized_body() {
        let raw = http::Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();

        let (req, failure) = Request::from_axum(raw, ServiceContext::default(), 16).await;
        let err = failure.unwrap();
        assert_eq!(err.status(), 413);
        assert_eq!(err.code().to_string(), PAYLOAD_TOO_LARGE);
        assert!(req.raw_body().is_empty());
    }

    #[test]
    fn builders_set_fields() {
        let req = Request::new(Method::PUT, "/cars/7".parse().unwrap())
            .with_params(json!({"carId": "7"}))
            .with_json_text("{}");
        assert_eq!(req.param("carId"), Some("7"));
        assert_eq!(req.header(CONTENT_TYPE), Some("application/json"));
        assert_eq!(req.raw_body().as_ref(), b"{}");
    }
}
