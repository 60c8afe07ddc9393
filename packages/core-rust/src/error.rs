//! Error model shared by every middleware chain.
//!
//! - [`ApiError`]: structured, client-safe error with status, code and detail
//! - [`Fault`]: the value carried in a chain's error slot
//! - [`StoreError`]: persistence failures the terminal responder knows how to describe

use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Code used when an [`ApiError`] is created without an explicit one.
pub const DEFAULT_CODE: &str = "INTERNAL_ERROR";

/// Code attached to input validation and body parsing failures.
pub const INVALID_INPUT: &str = "INVALID_INPUT";

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Application-specific error code. Clients see either a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Text(String),
    Number(i64),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(code) => f.write_str(code),
            Self::Number(code) => write!(f, "{code}"),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::Text(code.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::Text(code)
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        Self::Number(code)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self::Number(i64::from(code))
    }
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// An API level error: response details for clients plus a source location
/// for loggers.
///
/// The location is captured where the error is constructed and is never part
/// of [`ApiError::body`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    message: String,
    status: u16,
    code: ErrorCode,
    detail: Value,
    location: &'static Location<'static>,
}

impl ApiError {
    /// Creates an error with status 500, [`DEFAULT_CODE`] and the message as detail.
    #[track_caller]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            detail: Value::String(message.clone()),
            message,
            status: 500,
            code: ErrorCode::from(DEFAULT_CODE),
            location: Location::caller(),
        }
    }

    /// Shorthand for the 400 `INVALID_INPUT` error used by validators and parsers.
    #[track_caller]
    #[must_use]
    pub fn invalid_input(detail: impl Into<Value>) -> Self {
        Self::new("Invalid Input.")
            .with_status(400)
            .with_code(INVALID_INPUT)
            .with_detail(detail)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = code.into();
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = detail.into();
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status associated with the error.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &ErrorCode {
        &self.code
    }

    /// Client-safe detail payload.
    #[must_use]
    pub fn detail(&self) -> &Value {
        &self.detail
    }

    /// Source location where the error was created. For logs only.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The response body sent to clients: `{isError: true, code, detail}`.
    #[must_use]
    pub fn body(&self) -> ErrorBody<'_> {
        ErrorBody {
            is_error: true,
            code: &self.code,
            detail: &self.detail,
        }
    }
}

/// Serialized form of an [`ApiError`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<'a> {
    pub is_error: bool,
    pub code: &'a ErrorCode,
    pub detail: &'a Value,
}

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// Value propagated through a chain's error slot.
///
/// Structured errors are serialized as-is at the boundary; anything else is
/// reported as a generic internal error.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error(transparent)]
    Api(ApiError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Fault {
    /// Returns the structured error, if this is one.
    #[must_use]
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            Self::Other(_) => None,
        }
    }
}

impl From<ApiError> for Fault {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl From<StoreError> for Fault {
    fn from(err: StoreError) -> Self {
        Self::Other(anyhow::Error::new(err))
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Failures reported by persistence collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },
    /// The document failed model validation.
    #[error("document validation failed ({} violations)", .0.len())]
    Validation(Vec<FieldViolation>),
}

/// A single validation failure; may carry nested failures for embedded documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
    pub nested: Vec<FieldViolation>,
}

impl FieldViolation {
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            nested: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_nested(mut self, nested: Vec<FieldViolation>) -> Self {
        self.nested = nested;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
