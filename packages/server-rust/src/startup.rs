//! One-shot, priority-ordered, timeout-bounded boot tasks.
//!
//! A startup task receives the [`ServiceContext`] and a [`Completion`] it
//! must settle within the configured timeout. The timeout only stops the
//! wait: the task keeps running in the background and a late completion is
//! ignored.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::context::ServiceContext;

/// Timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Priority applied when none is configured.
pub const DEFAULT_PRIORITY: i32 = 0;

type TaskFn = Arc<dyn Fn(ServiceContext, Completion) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The task function returned an error before settling its completion.
    #[error("startup task failed synchronously: {0}")]
    Threw(#[source] anyhow::Error),
    #[error("startup task panicked: {message}")]
    Panicked { message: String },
    /// The task settled its completion with an error.
    #[error("startup task failed: {0}")]
    Failed(#[source] anyhow::Error),
    #[error("Startup task timed out. Should have completed within {} ms.", .timeout.as_millis())]
    TimedOut { timeout: Duration },
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Settles a startup task. Consumed on use, so it settles at most once.
pub struct Completion {
    tx: oneshot::Sender<anyhow::Result<Value>>,
}

impl Completion {
    pub fn done(self) {
        self.finish(Ok(Value::Null));
    }

    pub fn done_with(self, value: impl Into<Value>) {
        self.finish(Ok(value.into()));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        self.finish(Err(err.into()));
    }

    pub fn finish(self, result: anyhow::Result<Value>) {
        // Nobody is waiting after a timeout.
        let _ = self.tx.send(result);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// A boot-time initialization task.
#[derive(Clone)]
pub struct Startup {
    name: String,
    task: TaskFn,
    priority: i32,
    timeout: Duration,
}

impl Startup {
    /// Creates a task from a function that settles `Completion` itself,
    /// possibly from a spawned task.
    pub fn new<F>(task: F) -> Self
    where
        F: Fn(ServiceContext, Completion) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: "startup".to_string(),
            task: Arc::new(task),
            priority: DEFAULT_PRIORITY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates a task from an async function; its result settles the
    /// completion. The future runs on a spawned tokio task.
    pub fn from_future<F, Fut>(task: F) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(move |ctx, completion| {
            let fut = task(ctx);
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result.map(|()| Value::Null),
                    Err(panic) => Err(anyhow::anyhow!(
                        "startup task panicked: {}",
                        panic_message(panic.as_ref())
                    )),
                };
                completion.finish(result);
            });
            Ok(())
        })
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Higher priorities run first.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invokes the task function now and returns a future for its outcome.
    ///
    /// The future resolves with the completion value, or fails with the
    /// completion error, a synchronous failure, or [`StartupError::TimedOut`].
    /// A dropped completion counts as never settled.
    pub fn run(&self, ctx: ServiceContext) -> BoxFuture<'static, Result<Value, StartupError>> {
        let (tx, mut rx) = oneshot::channel();
        let invoked = catch_unwind(AssertUnwindSafe(|| (self.task)(ctx, Completion { tx })));

        let early = match invoked {
            Ok(Ok(())) => None,
            // A completion settled before the failure still wins.
            Ok(Err(err)) => match rx.try_recv() {
                Ok(settled) => Some(settled.map_err(StartupError::Failed)),
                Err(_) => Some(Err(StartupError::Threw(err))),
            },
            Err(panic) => Some(Err(StartupError::Panicked {
                message: panic_message(panic.as_ref()),
            })),
        };

        let timeout = self.timeout;
        async move {
            if let Some(outcome) = early {
                return outcome;
            }
            let settled = async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => std::future::pending().await,
                }
            };
            match tokio::time::timeout(timeout, settled).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(StartupError::Failed(err)),
                Err(_) => Err(StartupError::TimedOut { timeout }),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for Startup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Startup")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn resolves_with_completion_value() {
        let startup = Startup::new(|_ctx, completion| {
            completion.done_with(json!({"warm": true}));
            Ok(())
        });
        let value = startup.run(ServiceContext::default()).await.unwrap();
        assert_eq!(value, json!({"warm": true}));
    }

    #[tokio::test]
    async fn fails_with_completion_error() {
        let startup = Startup::new(|_ctx, completion| {
            tokio::spawn(async move { completion.fail(anyhow::anyhow!("db unreachable")) });
            Ok(())
        });
        let err = startup.run(ServiceContext::default()).await.unwrap_err();
        assert!(matches!(err, StartupError::Failed(ref e) if e.to_string() == "db unreachable"));
    }

    #[tokio::test]
    async fn synchronous_failure_is_reported() {
        let startup = Startup::new(|_ctx, _completion| Err(anyhow::anyhow!("bad config")));
        let err = startup.run(ServiceContext::default()).await.unwrap_err();
        assert!(matches!(err, StartupError::Threw(_)));
    }

    #[tokio::test]
    async fn settled_completion_wins_over_later_failure() {
        let startup = Startup::new(|_ctx, completion| {
            completion.done();
            Err(anyhow::anyhow!("ignored"))
        });
        assert_eq!(startup.run(ServiceContext::default()).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn panic_in_task_function_is_reported() {
        let startup = Startup::new(|_ctx, _completion| panic!("boom"));
        let err = startup.run(ServiceContext::default()).await.unwrap_err();
        assert!(matches!(err, StartupError::Panicked { ref message } if message == "boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_settled_task_times_out() {
        let held = Arc::new(parking_lot::Mutex::new(None));
        let keep = Arc::clone(&held);
        let startup = Startup::new(move |_ctx, completion| {
            *keep.lock() = Some(completion);
            Ok(())
        })
        .with_timeout(Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        let err = startup.run(ServiceContext::default()).await.unwrap_err();
        assert!(matches!(err, StartupError::TimedOut { timeout } if timeout == Duration::from_millis(50)));
        assert_eq!(started.elapsed(), Duration::from_millis(50));
        assert_eq!(
            err.to_string(),
            "Startup task timed out. Should have completed within 50 ms."
        );

        // A late completion is ignored.
        if let Some(completion) = held.lock().take() {
            completion.done();
        };
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_completion_counts_as_never_settled() {
        let startup = Startup::new(|_ctx, completion| {
            drop(completion);
            Ok(())
        })
        .with_timeout(Duration::from_millis(20));
        let err = startup.run(ServiceContext::default()).await.unwrap_err();
        assert!(matches!(err, StartupError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn from_future_settles_with_result() {
        let ok = Startup::from_future(|ctx: ServiceContext| async move {
            ctx.provide(3u16);
            Ok(())
        });
        let ctx = ServiceContext::default();
        ok.run(ctx.clone()).await.unwrap();
        assert_eq!(*ctx.get::<u16>().unwrap(), 3);

        let failing = Startup::from_future(|_ctx| async { Err(anyhow::anyhow!("nope")) });
        assert!(matches!(
            failing.run(ServiceContext::default()).await,
            Err(StartupError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn run_invokes_task_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let startup = Startup::new(move |_ctx, completion| {
            seen.fetch_add(1, Ordering::SeqCst);
            completion.done();
            Ok(())
        });

        let pending = startup.run(ServiceContext::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        pending.await.unwrap();
    }

    #[test]
    fn defaults_and_builders() {
        let startup = Startup::new(|_ctx, completion| {
            completion.done();
            Ok(())
        });
        assert_eq!(startup.priority(), DEFAULT_PRIORITY);
        assert_eq!(startup.timeout(), DEFAULT_TIMEOUT);

        let startup = startup
            .named("warm-cache")
            .with_priority(5)
            .with_timeout(Duration::from_secs(1));
        assert_eq!(startup.name(), "warm-cache");
        assert_eq!(startup.priority(), 5);
        assert_eq!(startup.timeout(), Duration::from_secs(1));
    }
}
