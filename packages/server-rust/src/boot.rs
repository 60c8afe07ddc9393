//! Bootstrap orchestrator: brings an [`Application`] from definitions to a
//! ready-to-serve state.
//!
//! Phases run in a fixed order and the first failure aborts the rest;
//! completed phases are not rolled back.
//!
//! 1. configuration is loaded into the application context
//! 2. startup tasks run concurrently, highest priority invoked first
//! 3. the pre-mount hook sees every route, then every route is mounted
//! 4. schedules are initialized
//! 5. the terminal error responder is installed

use std::cmp::Reverse;
use std::fmt;
use std::path::PathBuf;

use futures_util::future::join_all;
use svckit_core::{ConfigError, ConfigStore};
use tracing::{error, info};

use crate::app::Application;
use crate::discovery::Discovery;
use crate::responder::TerminalResponder;
use crate::route::{Route, RouteError};
use crate::schedule::{Schedule, ScheduleError};
use crate::startup::{Startup, StartupError};

/// Hook applied to every route before any route is mounted.
pub type PreMountHook = Box<dyn Fn(&mut Route) -> anyhow::Result<()> + Send + Sync>;

/// Instances processed per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootReport {
    pub startups: usize,
    pub routes: usize,
    pub schedules: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("discovery failed: {0:#}")]
    Discovery(#[source] anyhow::Error),
    #[error("startup task '{name}' failed: {source}")]
    Startup { name: String, source: StartupError },
    #[error("pre-mount hook failed for {route}: {source:#}")]
    PreMount {
        route: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to mount {route}: {source}")]
    Mount { route: String, source: RouteError },
    #[error("failed to initialize schedule '{name}': {source}")]
    Schedule { name: String, source: ScheduleError },
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

pub struct Bootstrap {
    app: Application,
    startups: Vec<Startup>,
    routes: Vec<Route>,
    schedules: Vec<Schedule>,
    discovery: Option<Discovery>,
    pre_mount: Option<PreMountHook>,
    config_dir: Option<PathBuf>,
    environment: Option<String>,
}

impl Bootstrap {
    #[must_use]
    pub fn new(app: Application) -> Self {
        Self {
            app,
            startups: Vec::new(),
            routes: Vec::new(),
            schedules: Vec::new(),
            discovery: None,
            pre_mount: None,
            config_dir: None,
            environment: None,
        }
    }

    #[must_use]
    pub fn startup(mut self, startup: Startup) -> Self {
        self.startups.push(startup);
        self
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedules.push(schedule);
        self
    }

    /// Adds discovered units after the explicitly registered ones of each
    /// phase.
    #[must_use]
    pub fn discover(mut self, discovery: Discovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    #[must_use]
    pub fn pre_mount_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Route) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre_mount = Some(Box::new(hook));
        self
    }

    /// Directory holding `default.json` and `<env>.json`. Without one the
    /// application keeps its current configuration.
    #[must_use]
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Environment override file; falls back to `SVCKIT_ENV`.
    #[must_use]
    pub fn environment(mut self, env: impl Into<String>) -> Self {
        self.environment = Some(env.into());
        self
    }

    /// Runs every phase.
    ///
    /// # Errors
    ///
    /// The first failure of any phase; later phases do not run.
    pub async fn boot(self) -> Result<Application, BootError> {
        let Self {
            mut app,
            mut startups,
            mut routes,
            mut schedules,
            discovery,
            pre_mount,
            config_dir,
            environment,
        } = self;
        let mut report = BootReport::default();

        if let Some(dir) = config_dir {
            info!(dir = %dir.display(), "loading configuration");
            app.set_config(ConfigStore::load(&dir, environment.as_deref())?);
        }

        // Startup phase
        if let Some(discovery) = &discovery {
            startups.extend(discovery.startups().map_err(BootError::Discovery)?);
        }
        startups.sort_by_key(|startup| Reverse(startup.priority()));
        info!(count = startups.len(), "running startup tasks");

        let pending: Vec<_> = startups
            .iter()
            .map(|startup| startup.run(app.context().clone()))
            .collect();
        let outcomes = join_all(pending).await;
        for (startup, outcome) in startups.iter().zip(outcomes) {
            if let Err(source) = outcome {
                error!(startup = %startup.name(), error = %source, "startup task failed");
                return Err(BootError::Startup {
                    name: startup.name().to_string(),
                    source,
                });
            }
        }
        report.startups = startups.len();

        // Route phase
        if let Some(discovery) = &discovery {
            routes.extend(discovery.routes().map_err(BootError::Discovery)?);
        }
        info!(count = routes.len(), "mounting routes");
        if let Some(hook) = &pre_mount {
            for route in &mut routes {
                hook(route).map_err(|source| BootError::PreMount {
                    route: route.to_string(),
                    source,
                })?;
            }
        }
        for route in routes {
            let label = route.to_string();
            route
                .mount(&mut app)
                .map_err(|source| BootError::Mount { route: label, source })?;
            report.routes += 1;
        }

        // Schedule phase
        if let Some(discovery) = &discovery {
            schedules.extend(discovery.schedules().map_err(BootError::Discovery)?);
        }
        info!(count = schedules.len(), "initializing schedules");
        for schedule in schedules {
            schedule
                .init(app.context().clone())
                .map_err(|source| BootError::Schedule {
                    name: schedule.name().to_string(),
                    source,
                })?;
            app.add_schedule(schedule);
            report.schedules += 1;
        }

        app.use_error_handler(TerminalResponder);
        app.set_report(report);
        info!(
            startups = report.startups,
            routes = report.routes,
            schedules = report.schedules,
            "boot complete"
        );
        Ok(app)
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("startups", &self.startups.len())
            .field("routes", &self.routes.len())
            .field("schedules", &self.schedules.len())
            .field("discovery", &self.discovery)
            .field("pre_mount", &self.pre_mount.is_some())
            .field("config_dir", &self.config_dir)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
