//! Recurring background jobs driven by cron expressions or fixed instants.
//!
//! A [`Schedule`] is inert until [`Schedule::init`], which may succeed only
//! once. Firings run one after another on a dedicated tokio task. With
//! `retry` disabled, the first failing firing stops every later one.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use chrono_tz::Tz;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use crate::context::ServiceContext;
use crate::startup::panic_message;

type JobFn = Arc<dyn Fn(ServiceContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Already initialized.")]
    AlreadyInitialized,
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },
    #[error("unsupported timezone: {0}")]
    UnsupportedTimezone(String),
}

// ---------------------------------------------------------------------------
// Trigger and timezone
// ---------------------------------------------------------------------------

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Cron expression; five-field expressions fire at second zero.
    Cron(String),
    /// A single instant. Instants in the past never fire.
    At(DateTime<Utc>),
}

impl From<&str> for Trigger {
    fn from(expression: &str) -> Self {
        Self::Cron(expression.to_string())
    }
}

impl From<String> for Trigger {
    fn from(expression: String) -> Self {
        Self::Cron(expression)
    }
}

impl From<DateTime<Utc>> for Trigger {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

/// Timezone cron expressions are evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Utc,
    Local,
    Fixed(FixedOffset),
    /// An IANA zone such as `America/Los_Angeles`, daylight saving included.
    Named(Tz),
}

impl FromStr for Zone {
    type Err = ScheduleError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "UTC" | "utc" | "Etc/UTC" | "Z" => Ok(Self::Utc),
            "local" | "Local" => Ok(Self::Local),
            other => other
                .parse::<FixedOffset>()
                .map(Self::Fixed)
                .or_else(|_| other.parse::<Tz>().map(Self::Named))
                .map_err(|_| ScheduleError::UnsupportedTimezone(name.to_string())),
        }
    }
}

/// A validated firing plan handed to a [`TimerSource`].
#[derive(Debug, Clone)]
pub enum Plan {
    Cron {
        schedule: Box<cron::Schedule>,
        zone: Zone,
    },
    At(DateTime<Utc>),
}

impl Plan {
    fn from_trigger(trigger: &Trigger, timezone: Option<&str>) -> Result<Self, ScheduleError> {
        let zone = timezone.map_or(Ok(Zone::Local), str::parse)?;
        match trigger {
            Trigger::At(at) => Ok(Self::At(*at)),
            Trigger::Cron(expression) => {
                let normalized = if expression.split_whitespace().count() == 5 {
                    format!("0 {expression}")
                } else {
                    expression.clone()
                };
                let schedule = normalized.parse::<cron::Schedule>().map_err(|err| {
                    ScheduleError::InvalidCron {
                        expression: expression.clone(),
                        message: err.to_string(),
                    }
                })?;
                Ok(Self::Cron {
                    schedule: Box::new(schedule),
                    zone,
                })
            }
        }
    }

    /// The first firing strictly after `now`.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::At(at) => (*at > now).then_some(*at),
            Self::Cron { schedule, zone } => match zone {
                Zone::Utc => schedule.after(&now).next(),
                Zone::Local => next_in_zone(schedule, &Local, now),
                Zone::Fixed(offset) => next_in_zone(schedule, offset, now),
                Zone::Named(tz) => next_in_zone(schedule, tz, now),
            },
        }
    }
}

fn next_in_zone<Z: TimeZone>(
    schedule: &cron::Schedule,
    zone: &Z,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&now.with_timezone(zone))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Timer source
// ---------------------------------------------------------------------------

/// Produces the firing stream of a schedule.
pub trait TimerSource: Send + Sync + 'static {
    fn ticker(&self, plan: Plan) -> Box<dyn Ticker>;
}

#[async_trait]
pub trait Ticker: Send + 'static {
    /// Waits for the next firing. Returns `false` when no firing remains.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock timers backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimers;

impl TimerSource for SystemTimers {
    fn ticker(&self, plan: Plan) -> Box<dyn Ticker> {
        Box::new(SystemTicker { plan, last: None })
    }
}

struct SystemTicker {
    plan: Plan,
    last: Option<DateTime<Utc>>,
}

#[async_trait]
impl Ticker for SystemTicker {
    async fn tick(&mut self) -> bool {
        let now = Utc::now();
        let from = self.last.map_or(now, |last| last.max(now));
        let Some(next) = self.plan.next_after(from) else {
            return false;
        };
        if let Ok(wait) = (next - now).to_std() {
            tokio::time::sleep(wait).await;
        }
        self.last = Some(next);
        true
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A firing failed and retry is disabled.
    JobFailed,
    /// [`Schedule::stop`] was called.
    Cancelled,
    /// The trigger has no firings left.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Uninitialized,
    Running,
    Stopped(StopReason),
    /// `init` ran but the trigger or timezone was unusable.
    Inert,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A recurring background job.
pub struct Schedule {
    name: String,
    trigger: Trigger,
    timezone: Option<String>,
    retry: bool,
    job: JobFn,
    timers: Arc<dyn TimerSource>,
    state: Arc<watch::Sender<ScheduleState>>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl Schedule {
    /// Creates a schedule running `job` on every firing of `trigger`.
    ///
    /// A job fails by returning `Err` or panicking.
    pub fn new<F, Fut>(trigger: impl Into<Trigger>, job: F) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (state, _) = watch::channel(ScheduleState::Uninitialized);
        Self {
            name: "schedule".to_string(),
            trigger: trigger.into(),
            timezone: None,
            retry: true,
            job: Arc::new(move |ctx| job(ctx).boxed()),
            timers: Arc::new(SystemTimers),
            state: Arc::new(state),
            cancel: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `UTC`, `local`, a fixed offset such as `+05:30` or an IANA name such
    /// as `Europe/Berlin`. Defaults to local time.
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Keep firing after a failed run. Defaults to `true`.
    #[must_use]
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_timers(mut self, timers: Arc<dyn TimerSource>) -> Self {
        self.timers = timers;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    #[must_use]
    pub fn retry(&self) -> bool {
        self.retry
    }

    #[must_use]
    pub fn state(&self) -> ScheduleState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ScheduleState> {
        self.state.subscribe()
    }

    /// Starts the timer. Must be called from within a tokio runtime.
    ///
    /// An unusable trigger or timezone is logged and leaves the schedule
    /// [`ScheduleState::Inert`]; that is not an error.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::AlreadyInitialized`] on every call after the first.
    pub fn init(&self, ctx: ServiceContext) -> Result<(), ScheduleError> {
        let plan = Plan::from_trigger(&self.trigger, self.timezone.as_deref());
        let next = if plan.is_ok() {
            ScheduleState::Running
        } else {
            ScheduleState::Inert
        };

        let claimed = self.state.send_if_modified(|state| {
            if *state == ScheduleState::Uninitialized {
                *state = next;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ScheduleError::AlreadyInitialized);
        }

        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                error!(
                    schedule = %self.name,
                    error = %err,
                    "Error initializing Schedule. Is the trigger a valid cron expression?"
                );
                return Ok(());
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel.lock() = Some(cancel_tx);

        let runner = Runner {
            name: self.name.clone(),
            retry: self.retry,
            job: Arc::clone(&self.job),
            state: Arc::clone(&self.state),
            ctx,
        };
        tokio::spawn(runner.run(self.timers.ticker(plan), cancel_rx));
        info!(schedule = %self.name, trigger = ?self.trigger, "schedule started");
        Ok(())
    }

    /// Suppresses all future firings. An in-flight job is left to finish.
    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
        mark_stopped(&self.state, StopReason::Cancelled);
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("timezone", &self.timezone)
            .field("retry", &self.retry)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn mark_stopped(state: &watch::Sender<ScheduleState>, reason: StopReason) {
    state.send_if_modified(|current| {
        if *current == ScheduleState::Running {
            *current = ScheduleState::Stopped(reason);
            true
        } else {
            false
        }
    });
}

struct Runner {
    name: String,
    retry: bool,
    job: JobFn,
    state: Arc<watch::Sender<ScheduleState>>,
    ctx: ServiceContext,
}

enum Wake {
    Fired(bool),
    Cancelled,
    /// The owning [`Schedule`] is gone; only a tick can wake the runner now.
    Detached,
}

impl Runner {
    async fn run(self, mut ticker: Box<dyn Ticker>, cancel: oneshot::Receiver<()>) {
        let mut cancel = Some(cancel);
        loop {
            let wake = match cancel.as_mut() {
                Some(signal) => tokio::select! {
                    biased;
                    stopped = signal => match stopped {
                        Ok(()) => Wake::Cancelled,
                        Err(_) => Wake::Detached,
                    },
                    fired = ticker.tick() => Wake::Fired(fired),
                },
                None => Wake::Fired(ticker.tick().await),
            };
            let fired = match wake {
                Wake::Fired(fired) => fired,
                Wake::Cancelled => {
                    mark_stopped(&self.state, StopReason::Cancelled);
                    return;
                }
                Wake::Detached => {
                    cancel = None;
                    continue;
                }
            };
            if !fired {
                mark_stopped(&self.state, StopReason::Exhausted);
                return;
            }

            let outcome = AssertUnwindSafe((self.job)(self.ctx.clone()))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => anyhow::anyhow!(
                    "scheduled job panicked: {}",
                    panic_message(panic.as_ref())
                ),
            };

            error!(schedule = %self.name, error = %failure, "Error running scheduled job.");
            if !self.retry {
                mark_stopped(&self.state, StopReason::JobFailed);
                info!(
                    schedule = %self.name,
                    "Schedule stopped: last job run failed and retry is false."
                );
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
