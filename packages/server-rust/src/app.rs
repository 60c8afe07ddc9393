//! The application routes are mounted on.
//!
//! An [`Application`] owns the axum router, the shared [`ServiceContext`],
//! an application-level error chain and the schedules started at boot.
//! Every mounted route runs its own chain first; a fault left in its error
//! slot then goes through the application error chain.

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::routing::{on, MethodFilter};
use axum::Router;
use http::{Method, StatusCode};
use svckit_core::{Chain, ChainError, ChainFn, ConfigStore, ErrorHandler, Fault, Item};
use tracing::{debug, error};

use crate::boot::BootReport;
use crate::context::ServiceContext;
use crate::http::{Request, Response};
use crate::route::{check_path, RouteError, RouteTarget};
use crate::schedule::Schedule;

/// Body size buffered per request when none is configured.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

type ErrorTail = Arc<ArcSwap<ChainFn<Request, Response>>>;

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub struct Application {
    router: Router,
    context: ServiceContext,
    error_chain: Chain<Request, Response>,
    error_tail: ErrorTail,
    mounted: HashSet<(Method, String)>,
    body_limit: usize,
    schedules: Vec<Schedule>,
    report: BootReport,
}

impl Application {
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(ServiceContext::default())
    }

    #[must_use]
    pub fn with_context(context: ServiceContext) -> Self {
        let error_chain = Chain::new();
        let error_tail = Arc::new(ArcSwap::from_pointee(error_chain.as_fn()));
        Self {
            router: Router::new(),
            context,
            error_chain,
            error_tail,
            mounted: HashSet::new(),
            body_limit: DEFAULT_BODY_LIMIT,
            schedules: Vec::new(),
            report: BootReport::default(),
        }
    }

    /// Maximum request body size buffered for routes mounted afterwards.
    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    #[must_use]
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Replaces the configuration seen by routes mounted afterwards, startup
    /// tasks and schedules.
    pub fn set_config(&mut self, config: ConfigStore) {
        self.context = self.context.with_config(config);
    }

    /// Appends an application-level error handler. Routes mounted earlier
    /// see it too.
    pub fn use_error_handler(&mut self, handler: impl ErrorHandler<Request, Response>) -> &mut Self {
        self.error_chain.use_error_handler(handler);
        self.publish_errors();
        self
    }

    /// Appends units to the application error chain.
    ///
    /// # Errors
    ///
    /// [`ChainError::InvalidMiddleware`] if a member is not callable.
    pub fn append_error_chain(
        &mut self,
        item: impl Into<Item<Request, Response>>,
    ) -> Result<&mut Self, ChainError> {
        self.error_chain.append(item)?;
        self.publish_errors();
        Ok(self)
    }

    fn publish_errors(&self) {
        self.error_tail.store(Arc::new(self.error_chain.as_fn()));
    }

    /// Mounted `(method, path)` pairs.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.mounted.iter().map(|(method, path)| (method, path.as_str()))
    }

    pub(crate) fn add_schedule(&mut self, schedule: Schedule) {
        self.schedules.push(schedule);
    }

    #[must_use]
    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Cancels future firings of every schedule.
    pub fn stop_schedules(&self) {
        for schedule in &self.schedules {
            schedule.stop();
        }
    }

    pub(crate) fn set_report(&mut self, report: BootReport) {
        self.report = report;
    }

    /// Instances processed per boot phase.
    #[must_use]
    pub fn report(&self) -> BootReport {
        self.report
    }

    /// A handle on the router; the application keeps its schedules.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Consumes the application. Started schedules keep firing; call
    /// [`Application::stop_schedules`] first to end them.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.mounted.len())
            .field("error_handlers", &self.error_chain.len())
            .field("schedules", &self.schedules.len())
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

impl RouteTarget for Application {
    fn supports(&self, method: &Method) -> bool {
        MethodFilter::try_from(method.clone()).is_ok()
    }

    fn register(
        &mut self,
        method: &Method,
        path: &str,
        handler: ChainFn<Request, Response>,
    ) -> Result<(), RouteError> {
        let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
            RouteError::UnsupportedMethod {
                method: method.clone(),
            }
        })?;
        check_path(path)?;
        let key = (method.clone(), path.to_string());
        let conflict = || RouteError::Conflict {
            method: method.clone(),
            path: path.to_string(),
        };
        if self.mounted.contains(&key) {
            return Err(conflict());
        }

        let mounted = Arc::new(MountedRoute {
            label: format!("{method} {path}"),
            chain: handler,
            errors: Arc::clone(&self.error_tail),
            context: self.context.clone(),
            body_limit: self.body_limit,
        });
        let method_router = on(filter, move |req: axum::extract::Request| {
            let mounted = Arc::clone(&mounted);
            async move { mounted.serve(req).await }
        });

        // With the path already checked, axum only panics on overlapping routes.
        let candidate = self.router.clone();
        let router = catch_unwind(AssertUnwindSafe(move || candidate.route(path, method_router)))
            .map_err(|_| conflict())?;

        self.router = router;
        self.mounted.insert(key);
        debug!(route = %format!("{method} {path}"), "route mounted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MountedRoute
// ---------------------------------------------------------------------------

struct MountedRoute {
    label: String,
    chain: ChainFn<Request, Response>,
    errors: ErrorTail,
    context: ServiceContext,
    body_limit: usize,
}

impl MountedRoute {
    async fn serve(&self, raw: axum::extract::Request) -> axum::response::Response {
        let (mut req, pending) =
            Request::from_axum(raw, self.context.clone(), self.body_limit).await;
        let mut res = Response::new();

        let fault = match self
            .chain
            .call_with(pending.map(Fault::from), &mut req, &mut res)
            .await
        {
            Ok(fault) => fault,
            Err(err) => {
                error!(route = %self.label, error = %err, "middleware rejected request");
                Some(Fault::Other(err))
            }
        };

        if let Some(fault) = fault {
            let errors = self.errors.load_full();
            let leftover = match errors.call_with(Some(fault), &mut req, &mut res).await {
                Ok(leftover) => leftover,
                Err(err) => {
                    error!(route = %self.label, error = %err, "error handler rejected request");
                    Some(Fault::Other(err))
                }
            };
            if let Some(fault) = leftover {
                error!(route = %self.label, error = %fault, "unhandled error");
                if !res.is_finished() {
                    res = Response::plain(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        }

        if !res.is_finished() {
            res = Response::plain(StatusCode::NOT_FOUND);
        }
        res.into_axum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
