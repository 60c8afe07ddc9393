//! JSON body parsing middleware.

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use serde_json::Value;
use svckit_core::{ApiError, Handler, Middleware, MiddlewareResult, Next};

use super::request::payload_too_large;
use super::{Request, Response};

/// Default maximum body size accepted by the parser.
pub const DEFAULT_LIMIT: usize = 100 * 1024;

/// Options for [`json_parser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonParseOptions {
    /// Maximum body size in bytes.
    pub limit: usize,
    /// Only accept objects and arrays at the root.
    pub strict: bool,
    /// Media types to parse. Any `+json` subtype is always accepted.
    pub content_types: Vec<String>,
}

impl Default for JsonParseOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            strict: true,
            content_types: vec!["application/json".to_string()],
        }
    }
}

impl JsonParseOptions {
    fn accepts(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence.ends_with("+json")
            || self
                .content_types
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(&essence))
    }
}

/// Creates a middleware unit that parses JSON request bodies into
/// [`Request::body`].
///
/// Requests with another content type, an empty body, or an already parsed
/// body pass through untouched. Malformed JSON fails with a 400
/// `INVALID_INPUT` error carrying the parser message.
#[must_use]
pub fn json_parser(options: JsonParseOptions) -> Middleware<Request, Response> {
    Middleware::normal(JsonParser { options })
}

struct JsonParser {
    options: JsonParseOptions,
}

#[async_trait]
impl Handler<Request, Response> for JsonParser {
    async fn handle(&self, req: &mut Request, _res: &mut Response) -> MiddlewareResult {
        if req.body.is_some() || req.raw_body().is_empty() {
            return Ok(Next::Continue);
        }
        if !req
            .header(CONTENT_TYPE)
            .is_some_and(|content_type| self.options.accepts(content_type))
        {
            return Ok(Next::Continue);
        }
        if req.raw_body().len() > self.options.limit {
            return Ok(Next::fail(payload_too_large(self.options.limit)));
        }

        let parsed: Value = match serde_json::from_slice(req.raw_body()) {
            Ok(value) => value,
            Err(err) => return Ok(Next::fail(ApiError::invalid_input(err.to_string()))),
        };
        if self.options.strict && !(parsed.is_object() || parsed.is_array()) {
            return Ok(Next::fail(ApiError::invalid_input(
                "JSON body must be an object or an array",
            )));
        }

        req.body = Some(parsed);
        Ok(Next::Continue)
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Method};
    use serde_json::json;
    use svckit_core::Chain;

    use super::*;

    async fn parse(options: JsonParseOptions, req: Request) -> (Request, Option<ApiError>) {
        let mut chain = Chain::new();
        chain.append(json_parser(options)).unwrap();

        let mut req = req;
        let mut res = Response::new();
        let fault = chain.as_fn().call(&mut req, &mut res).await.unwrap();
        let err = fault.map(|fault| fault.as_api().cloned().unwrap());
        (req, err)
    }

    fn post() -> Request {
        Request::new(Method::POST, "/items".parse().unwrap())
    }

    #[tokio::test]
    async fn parses_json_body() {
        let (req, err) = parse(JsonParseOptions::default(), post().with_json_text(r#"{"a": 1}"#)).await;
        assert!(err.is_none());
        assert_eq!(req.body, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_input() {
        let (req, err) = parse(JsonParseOptions::default(), post().with_json_text("{oops")).await;
        let err = err.unwrap();
        assert_eq!(err.status(), 400);
        assert_eq!(err.code().to_string(), "INVALID_INPUT");
        assert!(err.detail().is_string());
        assert!(req.body.is_none());
    }

    #[tokio::test]
    async fn strict_mode_rejects_scalars() {
        let (_, err) = parse(JsonParseOptions::default(), post().with_json_text("42")).await;
        assert_eq!(err.unwrap().status(), 400);

        let lenient = JsonParseOptions {
            strict: false,
            ..JsonParseOptions::default()
        };
        let (req, err) = parse(lenient, post().with_json_text("42")).await;
        assert!(err.is_none());
        assert_eq!(req.body, Some(json!(42)));
    }

    #[tokio::test]
    async fn other_content_types_pass_through() {
        let req = post()
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_raw_body("{\"a\": 1}");
        let (req, err) = parse(JsonParseOptions::default(), req).await;
        assert!(err.is_none());
        assert!(req.body.is_none());
    }

    #[tokio::test]
    async fn suffix_json_types_are_parsed() {
        let req = post()
            .with_header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/vnd.api+json; charset=utf-8"),
            )
            .with_raw_body("[1, 2]");
        let (req, err) = parse(JsonParseOptions::default(), req).await;
        assert!(err.is_none());
        assert_eq!(req.body, Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let options = JsonParseOptions {
            limit: 4,
            ..JsonParseOptions::default()
        };
        let (_, err) = parse(options, post().with_json_text(r#"{"a": 1}"#)).await;
        assert_eq!(err.unwrap().status(), 413);
    }

    #[tokio::test]
    async fn parsed_body_is_kept() {
        let req = post().with_body(json!({"kept": true})).with_json_text("{}");
        let (req, err) = parse(JsonParseOptions::default(), req).await;
        assert!(err.is_none());
        assert_eq!(req.body, Some(json!({"kept": true})));
    }
}
