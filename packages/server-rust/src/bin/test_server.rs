//! Demo server exercising routes, startup tasks, schedules and discovery.
//!
//! ```text
//! test-server --port 3000 --config-dir config --env development
//! ```
//!
//! Configuration keys read from the config directory:
//!
//! | Key | Description |
//! |-----|-------------|
//! | `auth.token` | Bearer token required on non-public routes. |
//! | `server.*` | See `NetworkConfig::from_store`. |

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use clap::Parser;
use http::header::AUTHORIZATION;
use serde_json::json;
use svckit_core::{handler_fn, ApiError, ConfigStore, Next};
use svckit_server::{
    Application, Bootstrap, Discovery, HttpServer, NetworkConfig, Request, Response, Route,
    Schedule, ServiceContext, Startup,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "test-server", about = "svckit demo server")]
struct Args {
    /// Bind address; overrides `server.host`.
    #[arg(long, env = "SVCKIT_HOST")]
    host: Option<String>,

    /// Port; overrides `server.port`.
    #[arg(long, env = "SVCKIT_PORT")]
    port: Option<u16>,

    /// Directory holding default.json and <env>.json.
    #[arg(long, env = "SVCKIT_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Environment override file name.
    #[arg(long, env = "SVCKIT_ENV")]
    env: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, env = "SVCKIT_LOG_JSON")]
    log_json: bool,
}

/// Marks a route as reachable without a bearer token.
struct Public;

/// Process facts filled in by the warm-up task.
struct Uptime {
    started: Instant,
    beats: AtomicU64,
}

mod services {
    pub mod routes {
        pub mod version {
            svckit_server::define_route!(|| {
                let mut route = svckit_server::Route::get("/version")?;
                route.set_meta(crate::Public);
                route.append(svckit_core::handler_fn(
                    |_req: &mut svckit_server::Request, res: &mut svckit_server::Response| {
                        Box::pin(async move {
                            res.json(&serde_json::json!({"version": env!("CARGO_PKG_VERSION")}))?;
                            Ok(svckit_core::Next::Continue)
                        })
                    },
                ))?;
                Ok(route)
            });
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn health_route() -> anyhow::Result<Route> {
    let mut route = Route::get("/health")?;
    route.set_meta(Public);
    route.append(handler_fn(|req: &mut Request, res: &mut Response| {
        Box::pin(async move {
            let uptime = req
                .context()
                .get::<Uptime>()
                .map_or(0, |uptime| uptime.started.elapsed().as_secs());
            res.json(&json!({"status": "ok", "uptimeSecs": uptime}))?;
            Ok(Next::Continue)
        })
    }))?;
    Ok(route)
}

fn login_route() -> anyhow::Result<Route> {
    let mut route = Route::post("/login")?;
    route.set_meta(Public);
    route.validate_body(&json!({
        "type": "object",
        "required": ["email", "password"],
        "properties": {
            "email": {"type": "string", "format": "email"},
            "password": {"type": "string", "format": "nonEmptyOrBlank"}
        }
    }))?;
    route.append(handler_fn(|req: &mut Request, res: &mut Response| {
        Box::pin(async move {
            let email = req
                .body
                .as_ref()
                .and_then(|body| body["email"].as_str())
                .unwrap_or_default()
                .to_string();
            res.json(&json!({"welcome": email}))?;
            Ok(Next::Continue)
        })
    }))?;
    Ok(route)
}

fn stats_route() -> anyhow::Result<Route> {
    let mut route = Route::get("/stats")?;
    route.append(handler_fn(|req: &mut Request, res: &mut Response| {
        Box::pin(async move {
            let beats = req
                .context()
                .get::<Uptime>()
                .map_or(0, |uptime| uptime.beats.load(Ordering::Relaxed));
            res.json(&json!({"heartbeats": beats}))?;
            Ok(Next::Continue)
        })
    }))?;
    Ok(route)
}

fn warm_up() -> Startup {
    Startup::from_future(|ctx: ServiceContext| async move {
        ctx.provide(Uptime {
            started: Instant::now(),
            beats: AtomicU64::new(0),
        });
        info!("warm-up complete");
        Ok(())
    })
    .named("warm-up")
    .with_priority(10)
}

fn heartbeat() -> Schedule {
    Schedule::new("* * * * *", |ctx: ServiceContext| async move {
        if let Some(uptime) = ctx.get::<Uptime>() {
            let beats = uptime.beats.fetch_add(1, Ordering::Relaxed) + 1;
            info!(beats, "heartbeat");
        }
        Ok(())
    })
    .named("heartbeat")
    .with_retry(true)
}

/// Prepends a bearer-token check to every route not marked [`Public`].
fn require_token(token: Option<String>) -> impl Fn(&mut Route) -> anyhow::Result<()> + Send + Sync {
    move |route: &mut Route| {
        if route.meta::<Public>().is_some() {
            return Ok(());
        }
        let Some(token) = token.clone() else {
            warn!(route = %route, "auth.token not configured, route left open");
            return Ok(());
        };
        let expected = format!("Bearer {token}");
        route.prepend(handler_fn(move |req: &mut Request, _res: &mut Response| {
            let authorized = req.header(AUTHORIZATION) == Some(expected.as_str());
            Box::pin(async move {
                if authorized {
                    Ok(Next::Continue)
                } else {
                    Ok(Next::fail(
                        ApiError::new("Unauthorized.")
                            .with_status(401)
                            .with_code("UNAUTHORIZED"),
                    ))
                }
            })
        }))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = ConfigStore::load(&args.config_dir, args.env.as_deref())?;
    let mut network = NetworkConfig::from_store(&config)?;
    if let Some(host) = args.host {
        network.host = host;
    }
    if let Some(port) = args.port {
        network.port = port;
    }
    let token = config.get::<String>("auth.token").ok();

    let app = Application::with_context(ServiceContext::new(config))
        .with_body_limit(network.max_body_size);
    let app = Bootstrap::new(app)
        .startup(warm_up())
        .route(health_route()?)
        .route(login_route()?)
        .route(stats_route()?)
        .schedule(heartbeat())
        .discover(Discovery::new(format!("{}::services", module_path!())))
        .pre_mount_hook(require_token(token))
        .boot()
        .await?;

    let mut server = HttpServer::new(network);
    let port = server.start().await?;
    info!(port, "test-server ready");

    server
        .serve(app, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
            }
        })
        .await
}
