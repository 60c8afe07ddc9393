//! HTTP server with a deferred startup lifecycle.
//!
//! `new()` only stores configuration, `start()` binds the TCP listener and
//! `serve()` accepts connections until the shutdown future resolves.

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::middleware::build_http_layers;
use crate::app::Application;

pub struct HttpServer {
    config: NetworkConfig,
    listener: Option<TcpListener>,
}

impl HttpServer {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Binds the listener and returns the bound port, which differs from the
    /// configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves `app` until `shutdown` resolves, then waits for in-flight
    /// requests and stops the application's schedules.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        self,
        app: Application,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };

        let router = app.router().layer(build_http_layers(&self.config));
        info!("serving HTTP connections");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        app.stop_schedules();
        info!("server stopped");
        served.map_err(Into::into)
    }
}
