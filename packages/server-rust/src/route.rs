//! Routes: a middleware chain bound to an HTTP method and path.
//!
//! A [`Route`] is built at service definition time (validators, handlers,
//! metadata) and consumed by [`Route::mount`], so each route is mounted at
//! most once.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use http::Method;
use serde_json::{Map, Value};
use svckit_core::{
    ApiError, Chain, ChainError, ChainFn, ErrorHandler, Handler, Item, Middleware,
    MiddlewareResult, Next, SchemaError, SchemaValidator,
};

use crate::http::{json_parser, JsonParseOptions, Request, Response};

pub use svckit_core::schema::add_format;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid HTTP method: {method}")]
    InvalidMethod { method: String },
    #[error("invalid route path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error(transparent)]
    InvalidSchema(#[from] SchemaError),
    #[error("method not supported by router: {method}")]
    UnsupportedMethod { method: Method },
    #[error("route already mounted: {method} {path}")]
    Conflict { method: Method, path: String },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

// ---------------------------------------------------------------------------
// RouteTarget
// ---------------------------------------------------------------------------

/// Something routes can be mounted on.
pub trait RouteTarget {
    /// True when the target can register handlers for `method`.
    fn supports(&self, method: &Method) -> bool;

    /// Registers `handler` for `method` and `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration conflicts with an existing one.
    fn register(
        &mut self,
        method: &Method,
        path: &str,
        handler: ChainFn<Request, Response>,
    ) -> Result<(), RouteError>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOptions {
    /// Parse JSON bodies before any other unit runs.
    pub parse_json: bool,
    pub parse_options: JsonParseOptions,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            parse_json: true,
            parse_options: JsonParseOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputSource {
    Params,
    Query,
    Body,
}

struct InputValidator {
    source: InputSource,
    validator: SchemaValidator,
}

#[async_trait]
impl Handler<Request, Response> for InputValidator {
    async fn handle(&self, req: &mut Request, _res: &mut Response) -> MiddlewareResult {
        let input = match self.source {
            InputSource::Params => Some(&req.params),
            InputSource::Query => Some(&req.query),
            InputSource::Body => req.body.as_ref(),
        };
        let empty = Value::Object(Map::new());
        let input = input.filter(|value| !value.is_null()).unwrap_or(&empty);

        let report = self.validator.validate(input);
        if report.valid {
            Ok(Next::Continue)
        } else {
            Ok(Next::fail(ApiError::invalid_input(report.to_detail())))
        }
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// A web endpoint: the execution path of a single HTTP request.
pub struct Route {
    method: Method,
    path: String,
    options: RouteOptions,
    chain: Chain<Request, Response>,
    meta: Option<Box<dyn Any + Send + Sync>>,
}

impl Route {
    /// Creates a route for `method` (any case) and `path`.
    ///
    /// Path parameters use braces, e.g. `/cars/{car_id}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the method is not a valid token or the path is
    /// malformed.
    pub fn new(method: &str, path: impl Into<String>) -> Result<Self, RouteError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            RouteError::InvalidMethod {
                method: method.to_string(),
            }
        })?;
        Self::with_method(method, path)
    }

    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn with_method(method: Method, path: impl Into<String>) -> Result<Self, RouteError> {
        let path = path.into();
        check_path(&path)?;
        Ok(Self {
            method,
            path,
            options: RouteOptions::default(),
            chain: Chain::new(),
            meta: None,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn get(path: impl Into<String>) -> Result<Self, RouteError> {
        Self::with_method(Method::GET, path)
    }

    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn post(path: impl Into<String>) -> Result<Self, RouteError> {
        Self::with_method(Method::POST, path)
    }

    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn put(path: impl Into<String>) -> Result<Self, RouteError> {
        Self::with_method(Method::PUT, path)
    }

    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn patch(path: impl Into<String>) -> Result<Self, RouteError> {
        Self::with_method(Method::PATCH, path)
    }

    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn delete(path: impl Into<String>) -> Result<Self, RouteError> {
        Self::with_method(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn options(&self) -> &RouteOptions {
        &self.options
    }

    /// Validates path parameters. See [`Route::validate_body`].
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidSchema`] if the schema does not compile.
    pub fn validate_params(&mut self, schema: &Value) -> Result<&mut Self, RouteError> {
        self.validate(InputSource::Params, schema)
    }

    /// Validates the query string. See [`Route::validate_body`].
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidSchema`] if the schema does not compile.
    pub fn validate_query(&mut self, schema: &Value) -> Result<&mut Self, RouteError> {
        self.validate(InputSource::Query, schema)
    }

    /// Prepends a unit validating the parsed body against `schema`; a missing
    /// body is validated as `{}`.
    ///
    /// Failures enter the error slot as a 400 `INVALID_INPUT` error whose
    /// detail is the validation report. Each call prepends, so the most
    /// recently added validator runs first.
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidSchema`] if the schema does not compile.
    pub fn validate_body(&mut self, schema: &Value) -> Result<&mut Self, RouteError> {
        self.validate(InputSource::Body, schema)
    }

    fn validate(&mut self, source: InputSource, schema: &Value) -> Result<&mut Self, RouteError> {
        let validator = SchemaValidator::compile(schema)?;
        self.chain
            .prepend(Middleware::normal(InputValidator { source, validator }))?;
        Ok(self)
    }

    pub fn use_handler(&mut self, handler: impl Handler<Request, Response>) -> &mut Self {
        self.chain.use_handler(handler);
        self
    }

    pub fn use_error_handler(&mut self, handler: impl ErrorHandler<Request, Response>) -> &mut Self {
        self.chain.use_error_handler(handler);
        self
    }

    /// # Errors
    ///
    /// [`RouteError::Chain`] if any member is not callable; the route is unchanged.
    pub fn append(
        &mut self,
        item: impl Into<Item<Request, Response>>,
    ) -> Result<&mut Self, RouteError> {
        self.chain.append(item)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// [`RouteError::Chain`] if any member is not callable; the route is unchanged.
    pub fn prepend(
        &mut self,
        item: impl Into<Item<Request, Response>>,
    ) -> Result<&mut Self, RouteError> {
        self.chain.prepend(item)?;
        Ok(self)
    }

    #[must_use]
    pub fn has(&self, unit: &Middleware<Request, Response>) -> bool {
        self.chain.has(unit)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    #[must_use]
    pub fn as_fn(&self) -> ChainFn<Request, Response> {
        self.chain.as_fn()
    }

    /// Attaches an opaque payload for collaborators such as pre-mount hooks.
    pub fn set_meta<T: Any + Send + Sync>(&mut self, meta: T) -> &mut Self {
        self.meta = Some(Box::new(meta));
        self
    }

    /// The attached payload, if it is a `T`.
    #[must_use]
    pub fn meta<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.meta.as_deref().and_then(|meta| meta.downcast_ref::<T>())
    }

    /// Registers the route on `target`.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnsupportedMethod`] before anything else if the target
    /// cannot route this method, or the target's registration error.
    pub fn mount<T: RouteTarget + ?Sized>(mut self, target: &mut T) -> Result<(), RouteError> {
        if !target.supports(&self.method) {
            return Err(RouteError::UnsupportedMethod {
                method: self.method,
            });
        }
        if self.options.parse_json {
            self.chain
                .prepend(json_parser(self.options.parse_options.clone()))?;
        }
        target.register(&self.method, &self.path, self.chain.as_fn())
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("units", &self.chain.len())
            .field("parse_json", &self.options.parse_json)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

pub(crate) fn check_path(path: &str) -> Result<(), RouteError> {
    let invalid = |reason| RouteError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(invalid("parameters use '{name}' or '{*name}' syntax"));
        }
        if !segment.contains(['{', '}']) {
            continue;
        }
        let name = segment
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| invalid("a parameter must fill its whole segment"))?;
        let (name, catch_all) = match name.strip_prefix('*') {
            Some(name) => (name, true),
            None => (name, false),
        };
        if name.is_empty() || name.contains(['{', '}', '*']) {
            return Err(invalid("malformed parameter name"));
        }
        if catch_all && index + 1 != segments.len() {
            return Err(invalid("a catch-all parameter must be the last segment"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
