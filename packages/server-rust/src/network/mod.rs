//! Network configuration, transport middleware and the HTTP server.

pub mod config;
pub mod middleware;
pub mod server;

pub use config::NetworkConfig;
pub use middleware::{build_http_layers, REQUEST_ID_HEADER};
pub use server::HttpServer;
