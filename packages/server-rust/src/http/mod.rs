//! Request/response exchange types over axum, plus the JSON body parser.

pub mod json_parser;
pub mod request;
pub mod response;

pub use json_parser::{json_parser, JsonParseOptions};
pub use request::{Request, PAYLOAD_TOO_LARGE};
pub use response::{Response, ResponseError};
