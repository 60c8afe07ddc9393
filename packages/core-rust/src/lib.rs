//! svckit core: middleware chains, API errors, input schemas and configuration.
//!
//! Nothing here knows about HTTP; request and response types are generic
//! parameters supplied by the transport crate.

pub mod chain;
pub mod config;
pub mod error;
pub mod schema;

pub use chain::{
    error_handler_fn, handler_fn, Chain, ChainError, ChainFn, ErrorHandler, Handler, Item,
    Middleware, MiddlewareResult, Next,
};
pub use config::{ConfigError, ConfigStore};
pub use error::{ApiError, ErrorBody, ErrorCode, Fault, FieldViolation, StoreError};
pub use schema::{add_format, SchemaError, SchemaValidator, ValidationIssue, ValidationReport};
