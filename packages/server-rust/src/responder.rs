//! Terminal error handler: turns the error slot into a JSON error response.

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{json, Value};
use svckit_core::{ApiError, ErrorHandler, Fault, FieldViolation, MiddlewareResult, Next, StoreError};
use tracing::{error, info, warn};

use crate::http::{Request, Response};

/// Message of the 500 error sent for anything that is not an [`ApiError`].
pub const INTERNAL_MESSAGE: &str = "Internal Server Error.";

const DUPLICATE_DOCUMENT: &str = "Document already exists.";
const UNKNOWN_ERROR: &str = "Unknown Error";

/// Sends `{isError, code, detail}` for the fault in the error slot.
///
/// [`ApiError`]s are sent with their own status, code and detail. Any other
/// error becomes a 500 whose detail is salvaged by [`inspect_detail`]. If the
/// response was already sent it is only ended. The slot is always cleared.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalResponder;

#[async_trait]
impl ErrorHandler<Request, Response> for TerminalResponder {
    async fn handle_error(
        &self,
        fault: Fault,
        req: &mut Request,
        res: &mut Response,
    ) -> MiddlewareResult {
        info!(method = %req.method(), uri = %req.uri(), "request has error");

        let err = match fault {
            Fault::Api(err) => {
                warn!(error = %err, location = %err.location(), "api error");
                err
            }
            Fault::Other(err) => {
                error!(error = ?err, "server error");
                ApiError::new(INTERNAL_MESSAGE)
                    .with_status(500)
                    .with_detail(inspect_detail(&err))
            }
        };

        if res.is_finished() {
            res.end();
            warn!("response already sent, cannot respond with error");
            return Ok(Next::Continue);
        }

        let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        res.set_status(status);
        res.json(&err.body())?;
        Ok(Next::Continue)
    }
}

/// Salvages a client-facing detail from an arbitrary error.
///
/// Duplicate-key store errors become `["Document already exists."]`, store
/// validation errors a flat list of `{path, message}`, anything else its
/// message.
#[must_use]
pub fn inspect_detail(err: &anyhow::Error) -> Value {
    for cause in err.chain() {
        match cause.downcast_ref::<StoreError>() {
            Some(StoreError::DuplicateKey { .. }) => return json!([DUPLICATE_DOCUMENT]),
            Some(StoreError::Validation(violations)) => {
                let mut flat = Vec::new();
                flatten(violations, &mut flat);
                return Value::Array(flat);
            }
            None => {}
        }
    }

    let message = err.to_string();
    if message.is_empty() {
        Value::String(UNKNOWN_ERROR.to_string())
    } else {
        Value::String(message)
    }
}

fn flatten(violations: &[FieldViolation], out: &mut Vec<Value>) {
    for violation in violations {
        out.push(json!({"path": violation.path, "message": violation.message}));
        flatten(&violation.nested, out);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
