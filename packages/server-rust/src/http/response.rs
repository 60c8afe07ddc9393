use axum::body::Body;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("response already sent")]
    AlreadySent,
    #[error("failed to serialize response body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The response side of a route exchange.
///
/// Once a body is sent the response is finished and further sends fail.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
    pub locals: Extensions,
}

impl Response {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finished: false,
            locals: Extensions::new(),
        }
    }

    /// A finished `text/plain` response carrying the status' reason phrase.
    #[must_use]
    pub fn plain(status: StatusCode) -> Self {
        let mut res = Self::new();
        res.status = status;
        res.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        res.finish(Bytes::from_static(
            status.canonical_reason().unwrap_or("Error").as_bytes(),
        ));
        res
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Sends `value` as a JSON body.
    ///
    /// # Errors
    ///
    /// [`ResponseError::AlreadySent`] after a previous send, or a
    /// serialization error.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ResponseError> {
        if self.finished {
            return Err(ResponseError::AlreadySent);
        }
        let body = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.finish(Bytes::from(body));
        Ok(())
    }

    /// Sends a raw body.
    ///
    /// # Errors
    ///
    /// [`ResponseError::AlreadySent`] after a previous send.
    pub fn send(&mut self, body: impl Into<Bytes>) -> Result<(), ResponseError> {
        if self.finished {
            return Err(ResponseError::AlreadySent);
        }
        self.finish(body.into());
        Ok(())
    }

    /// Finishes the response without changing the body.
    pub fn end(&mut self) {
        self.finished = true;
    }

    /// True once a body was sent or [`Response::end`] was called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_axum(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn finish(&mut self, body: Bytes) {
        self.body = body;
        self.finished = true;
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
