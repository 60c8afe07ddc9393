//! Middleware chains: ordered, composable request-processing steps.
//!
//! A [`Chain`] collects [`Middleware`] units and runs them strictly in order
//! through a [`ChainFn`] snapshot. Each execution owns a private error slot:
//!
//! | slot  | unit           | action                                 |
//! |-------|----------------|----------------------------------------|
//! | empty | normal         | `handle(req, res)`                     |
//! | empty | error-handling | skipped                                |
//! | set   | normal         | skipped                                |
//! | set   | error-handling | `handle_error(fault, req, res)`        |
//!
//! A unit's [`Next`] replaces the slot, so an error handler returning
//! [`Next::Continue`] clears the error and normal processing resumes. A unit
//! returning `Err` aborts the whole execution; that error goes back to the
//! caller of [`ChainFn::call`] and never enters the slot.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::Fault;

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Outcome of a middleware unit that completed normally.
#[derive(Debug)]
pub enum Next {
    /// Continue with an empty error slot.
    Continue,
    /// Continue with the given error in the slot.
    Fail(Fault),
}

impl Next {
    /// Puts `err` in the error slot.
    pub fn fail(err: impl Into<Fault>) -> Self {
        Self::Fail(err.into())
    }

    fn into_slot(self) -> Option<Fault> {
        match self {
            Self::Continue => None,
            Self::Fail(fault) => Some(fault),
        }
    }
}

impl From<Option<Fault>> for Next {
    fn from(slot: Option<Fault>) -> Self {
        slot.map_or(Self::Continue, Self::Fail)
    }
}

/// Result of running one unit. `Err` aborts the execution.
pub type MiddlewareResult = anyhow::Result<Next>;

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// A normal middleware unit, invoked while the error slot is empty.
#[async_trait]
pub trait Handler<Q, S>: Send + Sync + 'static
where
    Q: Send + 'static,
    S: Send + 'static,
{
    async fn handle(&self, req: &mut Q, res: &mut S) -> MiddlewareResult;
}

/// An error-handling middleware unit, invoked while the error slot is set.
#[async_trait]
pub trait ErrorHandler<Q, S>: Send + Sync + 'static
where
    Q: Send + 'static,
    S: Send + 'static,
{
    async fn handle_error(&self, fault: Fault, req: &mut Q, res: &mut S) -> MiddlewareResult;
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// A middleware unit, tagged at registration time.
pub enum Middleware<Q, S> {
    Normal(Arc<dyn Handler<Q, S>>),
    ErrorHandling(Arc<dyn ErrorHandler<Q, S>>),
}

impl<Q, S> Middleware<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
{
    pub fn normal(handler: impl Handler<Q, S>) -> Self {
        Self::Normal(Arc::new(handler))
    }

    pub fn error_handling(handler: impl ErrorHandler<Q, S>) -> Self {
        Self::ErrorHandling(Arc::new(handler))
    }

    #[must_use]
    pub fn is_error_handling(&self) -> bool {
        matches!(self, Self::ErrorHandling(_))
    }

    /// Identity comparison: true when both refer to the same registered unit.
    #[must_use]
    pub fn same_unit(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Normal(a), Self::Normal(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (Self::ErrorHandling(a), Self::ErrorHandling(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl<Q, S> Clone for Middleware<Q, S> {
    fn clone(&self) -> Self {
        match self {
            Self::Normal(h) => Self::Normal(Arc::clone(h)),
            Self::ErrorHandling(h) => Self::ErrorHandling(Arc::clone(h)),
        }
    }
}

impl<Q, S> fmt::Debug for Middleware<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(h) => write!(f, "Normal({:p})", Arc::as_ptr(h)),
            Self::ErrorHandling(h) => write!(f, "ErrorHandling({:p})", Arc::as_ptr(h)),
        }
    }
}

// ---------------------------------------------------------------------------
// Closure adapters
// ---------------------------------------------------------------------------

struct FnHandler<F>(F);

#[async_trait]
impl<Q, S, F> Handler<Q, S> for FnHandler<F>
where
    Q: Send + 'static,
    S: Send + 'static,
    F: for<'a> Fn(&'a mut Q, &'a mut S) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
{
    async fn handle(&self, req: &mut Q, res: &mut S) -> MiddlewareResult {
        (self.0)(req, res).await
    }
}

struct FnErrorHandler<F>(F);

#[async_trait]
impl<Q, S, F> ErrorHandler<Q, S> for FnErrorHandler<F>
where
    Q: Send + 'static,
    S: Send + 'static,
    F: for<'a> Fn(Fault, &'a mut Q, &'a mut S) -> BoxFuture<'a, MiddlewareResult>
        + Send
        + Sync
        + 'static,
{
    async fn handle_error(&self, fault: Fault, req: &mut Q, res: &mut S) -> MiddlewareResult {
        (self.0)(fault, req, res).await
    }
}

/// Wraps a closure as a normal unit.
///
/// ```ignore
/// let log = handler_fn(|req: &mut Req, _res: &mut Res| Box::pin(async move {
///     tracing::debug!(path = %req.path, "request");
///     Ok(Next::Continue)
/// }));
/// ```
pub fn handler_fn<Q, S, F>(f: F) -> Middleware<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
    F: for<'a> Fn(&'a mut Q, &'a mut S) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
{
    Middleware::Normal(Arc::new(FnHandler(f)))
}

/// Wraps a closure as an error-handling unit.
pub fn error_handler_fn<Q, S, F>(f: F) -> Middleware<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
    F: for<'a> Fn(Fault, &'a mut Q, &'a mut S) -> BoxFuture<'a, MiddlewareResult>
        + Send
        + Sync
        + 'static,
{
    Middleware::ErrorHandling(Arc::new(FnErrorHandler(f)))
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// Input accepted by [`Chain::append`] and [`Chain::prepend`].
///
/// Nested lists are flattened at any depth and nested chains are spliced in
/// unit by unit.
pub enum Item<Q, S> {
    Single(Middleware<Q, S>),
    Nested(Chain<Q, S>),
    Many(Vec<Item<Q, S>>),
    /// A member with nothing callable behind it. Rejects the whole mutation.
    Hole,
}

impl<Q, S> From<Middleware<Q, S>> for Item<Q, S> {
    fn from(unit: Middleware<Q, S>) -> Self {
        Self::Single(unit)
    }
}

impl<Q, S> From<Chain<Q, S>> for Item<Q, S> {
    fn from(chain: Chain<Q, S>) -> Self {
        Self::Nested(chain)
    }
}

impl<Q, S> From<&Chain<Q, S>> for Item<Q, S> {
    fn from(chain: &Chain<Q, S>) -> Self {
        Self::Nested(chain.clone())
    }
}

impl<Q, S, T: Into<Item<Q, S>>> From<Vec<T>> for Item<Q, S> {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items.into_iter().map(Into::into).collect())
    }
}

impl<Q, S> From<Option<Middleware<Q, S>>> for Item<Q, S> {
    fn from(unit: Option<Middleware<Q, S>>) -> Self {
        unit.map_or(Self::Hole, Self::Single)
    }
}

/// Errors from chain mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("invalid middleware: member at position {position} is not callable")]
    InvalidMiddleware { position: usize },
}

fn flatten<Q, S>(item: Item<Q, S>, out: &mut Vec<Middleware<Q, S>>) -> Result<(), ChainError> {
    match item {
        Item::Single(unit) => out.push(unit),
        Item::Nested(chain) => out.extend(chain.units),
        Item::Many(items) => {
            for item in items {
                flatten(item, out)?;
            }
        }
        Item::Hole => {
            return Err(ChainError::InvalidMiddleware {
                position: out.len(),
            })
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// An ordered sequence of middleware units that runs as a single unit.
pub struct Chain<Q, S> {
    units: Vec<Middleware<Q, S>>,
}

impl<Q, S> Chain<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    /// Adds units at the end of the chain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidMiddleware`] if any member is a hole; the
    /// chain is left unchanged.
    pub fn append(&mut self, item: impl Into<Item<Q, S>>) -> Result<&mut Self, ChainError> {
        let mut resolved = Vec::new();
        flatten(item.into(), &mut resolved)?;
        self.units.extend(resolved);
        Ok(self)
    }

    /// Adds units at the start of the chain, keeping their relative order.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidMiddleware`] if any member is a hole; the
    /// chain is left unchanged.
    pub fn prepend(&mut self, item: impl Into<Item<Q, S>>) -> Result<&mut Self, ChainError> {
        let mut resolved = Vec::new();
        flatten(item.into(), &mut resolved)?;
        self.units.splice(0..0, resolved);
        Ok(self)
    }

    /// Appends a normal unit.
    pub fn use_handler(&mut self, handler: impl Handler<Q, S>) -> &mut Self {
        self.units.push(Middleware::normal(handler));
        self
    }

    /// Appends an error-handling unit.
    pub fn use_error_handler(&mut self, handler: impl ErrorHandler<Q, S>) -> &mut Self {
        self.units.push(Middleware::error_handling(handler));
        self
    }

    /// Identity membership check.
    #[must_use]
    pub fn has(&self, unit: &Middleware<Q, S>) -> bool {
        self.units.iter().any(|u| u.same_unit(unit))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    #[must_use]
    pub fn units(&self) -> &[Middleware<Q, S>] {
        &self.units
    }

    /// Snapshot of the current units as one callable.
    ///
    /// Later mutations of this chain do not affect the returned value.
    #[must_use]
    pub fn as_fn(&self) -> ChainFn<Q, S> {
        ChainFn {
            units: self.units.iter().cloned().collect(),
        }
    }
}

impl<Q, S> Clone for Chain<Q, S> {
    fn clone(&self) -> Self {
        Self {
            units: self.units.clone(),
        }
    }
}

impl<Q, S> Default for Chain<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, S> fmt::Debug for Chain<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("units", &self.units).finish()
    }
}

// ---------------------------------------------------------------------------
// ChainFn
// ---------------------------------------------------------------------------

/// An immutable, cheaply cloneable chain execution.
pub struct ChainFn<Q, S> {
    units: Arc<[Middleware<Q, S>]>,
}

impl<Q, S> ChainFn<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
{
    /// Runs every unit in order and returns the final error slot.
    ///
    /// # Errors
    ///
    /// Returns the error of the first unit that failed instead of completing.
    /// Units after it are not invoked.
    pub async fn call(&self, req: &mut Q, res: &mut S) -> anyhow::Result<Option<Fault>> {
        self.call_with(None, req, res).await
    }

    /// Same as [`ChainFn::call`], starting with `initial` in the error slot.
    ///
    /// # Errors
    ///
    /// See [`ChainFn::call`].
    pub async fn call_with(
        &self,
        initial: Option<Fault>,
        req: &mut Q,
        res: &mut S,
    ) -> anyhow::Result<Option<Fault>> {
        let mut slot = initial;
        for unit in self.units.iter() {
            let next = match (slot.take(), unit) {
                (None, Middleware::Normal(handler)) => handler.handle(req, res).await?,
                (Some(fault), Middleware::ErrorHandling(handler)) => {
                    handler.handle_error(fault, req, res).await?
                }
                (pending, _) => {
                    slot = pending;
                    continue;
                }
            };
            slot = next.into_slot();
        }
        Ok(slot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl<Q, S> Clone for ChainFn<Q, S> {
    fn clone(&self) -> Self {
        Self {
            units: Arc::clone(&self.units),
        }
    }
}

impl<Q, S> fmt::Debug for ChainFn<Q, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainFn").field("units", &self.units.len()).finish()
    }
}

#[async_trait]
impl<Q, S> Handler<Q, S> for ChainFn<Q, S>
where
    Q: Send + 'static,
    S: Send + 'static,
{
    async fn handle(&self, req: &mut Q, res: &mut S) -> MiddlewareResult {
        Ok(Next::from(self.call(req, res).await?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;
    use crate::error::ApiError;

    #[derive(Default)]
    struct Req;

    /// Records visited unit labels.
    #[derive(Default)]
    struct Res {
        trail: Vec<String>,
    }

    type Unit = Middleware<Req, Res>;

    fn pass(label: &'static str) -> Unit {
        handler_fn(move |_req: &mut Req, res: &mut Res| {
            Box::pin(async move {
                res.trail.push(label.to_string());
                Ok(Next::Continue)
            })
        })
    }

    fn raise(label: &'static str, message: &'static str) -> Unit {
        handler_fn(move |_req: &mut Req, res: &mut Res| {
            Box::pin(async move {
                res.trail.push(label.to_string());
                Ok(Next::fail(ApiError::new(message)))
            })
        })
    }

    fn throw(label: &'static str) -> Unit {
        handler_fn(move |_req: &mut Req, res: &mut Res| {
            Box::pin(async move {
                res.trail.push(label.to_string());
                Err(anyhow::anyhow!("thrown by {label}"))
            })
        })
    }

    /// Error handler that records the fault message and clears the slot.
    fn recover(label: &'static str) -> Unit {
        error_handler_fn(move |fault: Fault, _req: &mut Req, res: &mut Res| {
            Box::pin(async move {
                res.trail.push(format!("{label}:{fault}"));
                Ok(Next::Continue)
            })
        })
    }

    /// Error handler that records and keeps propagating.
    fn observe(label: &'static str) -> Unit {
        error_handler_fn(move |fault: Fault, _req: &mut Req, res: &mut Res| {
            Box::pin(async move {
                res.trail.push(format!("{label}:{fault}"));
                Ok(Next::Fail(fault))
            })
        })
    }

    async fn run(chain: &Chain<Req, Res>) -> (anyhow::Result<Option<Fault>>, Vec<String>) {
        let mut res = Res::default();
        let outcome = chain.as_fn().call(&mut Req, &mut res).await;
        (outcome, res.trail)
    }

    #[test]
    fn append_flattens_nested_lists_and_chains() {
        let units: Vec<Unit> = (0..5).map(|_| pass("x")).collect();

        let mut inner = Chain::new();
        inner
            .append(vec![units[3].clone(), units[4].clone()])
            .unwrap();

        let mut chain = Chain::new();
        chain.append(units[0].clone()).unwrap();
        chain
            .append(vec![
                Item::from(units[1].clone()),
                Item::from(vec![Item::from(units[2].clone()), Item::from(inner)]),
            ])
            .unwrap();

        assert_eq!(chain.len(), 5);
        for (unit, expected) in chain.units().iter().zip(&units) {
            assert!(unit.same_unit(expected));
        }
    }

    #[test]
    fn prepend_keeps_relative_order_of_arguments() {
        let units: Vec<Unit> = (0..5).map(|_| pass("x")).collect();

        let mut inner = Chain::new();
        inner
            .prepend(vec![
                Item::from(units[1].clone()),
                Item::from(vec![units[2].clone(), units[3].clone()]),
            ])
            .unwrap();

        let mut chain = Chain::new();
        chain.append(units[4].clone()).unwrap();
        chain
            .prepend(vec![Item::from(units[0].clone()), Item::from(inner)])
            .unwrap();

        for (unit, expected) in chain.units().iter().zip(&units) {
            assert!(unit.same_unit(expected));
        }
    }

    #[tokio::test]
    async fn sequential_prepends_put_last_first() {
        let mut chain = Chain::new();
        chain.append(pass("tail")).unwrap();
        chain.prepend(pass("a")).unwrap();
        chain.prepend(pass("b")).unwrap();
        chain.prepend(pass("c")).unwrap();

        let (outcome, trail) = run(&chain).await;
        assert!(outcome.unwrap().is_none());
        assert_eq!(trail, vec!["c", "b", "a", "tail"]);
    }

    #[test]
    fn rejected_append_leaves_chain_unchanged() {
        let mut chain = Chain::new();
        chain.append(pass("0")).unwrap();

        let err = chain
            .append(vec![
                Item::from(pass("1")),
                Item::from(vec![Item::from(pass("2")), Item::Hole, Item::from(pass("3"))]),
            ])
            .unwrap_err();

        assert_eq!(err, ChainError::InvalidMiddleware { position: 2 });
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn rejected_prepend_leaves_chain_unchanged() {
        let mut chain = Chain::new();
        chain.append(pass("0")).unwrap();

        let missing: Option<Unit> = None;
        let result = chain.prepend(vec![Item::from(pass("1")), Item::from(missing)]);

        assert!(result.is_err());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn has_checks_identity() {
        let units: Vec<Unit> = (0..3).map(|_| pass("x")).collect();
        let mut chain = Chain::new();
        chain.append(units.clone()).unwrap();

        for unit in &units {
            assert!(chain.has(unit));
        }
        assert!(!chain.has(&pass("x")));
    }

    #[tokio::test]
    async fn empty_chain_completes_without_error() {
        let (outcome, trail) = run(&Chain::new()).await;
        assert!(outcome.unwrap().is_none());
        assert!(trail.is_empty());
    }

    #[tokio::test]
    async fn error_skips_normal_units_until_handled() {
        let mut chain = Chain::new();
        chain
            .append(vec![
                pass("0"),
                pass("1"),
                raise("2", "bad"),
                pass("3"),
                pass("4"),
                recover("5"),
                pass("6"),
            ])
            .unwrap();

        let (outcome, trail) = run(&chain).await;
        assert!(outcome.unwrap().is_none());
        assert_eq!(trail, vec!["0", "1", "2", "5:bad", "6"]);
    }

    #[tokio::test]
    async fn error_handlers_are_skipped_without_error() {
        let mut chain = Chain::new();
        chain
            .append(vec![pass("0"), recover("1"), pass("2")])
            .unwrap();

        let (outcome, trail) = run(&chain).await;
        assert!(outcome.unwrap().is_none());
        assert_eq!(trail, vec!["0", "2"]);
    }

    #[tokio::test]
    async fn unhandled_error_reaches_completion() {
        let mut chain = Chain::new();
        chain
            .append(vec![pass("0"), raise("1", "lost"), observe("2"), pass("3")])
            .unwrap();

        let (outcome, trail) = run(&chain).await;
        let fault = outcome.unwrap().expect("fault should propagate");
        assert_eq!(fault.to_string(), "lost");
        assert_eq!(trail, vec!["0", "1", "2:lost"]);
    }

    #[tokio::test]
    async fn thrown_error_rejects_instead_of_completing() {
        let mut chain = Chain::new();
        chain
            .append(vec![pass("0"), throw("1"), pass("2"), recover("3")])
            .unwrap();

        let (outcome, trail) = run(&chain).await;
        let err = outcome.unwrap_err();
        assert_eq!(err.to_string(), "thrown by 1");
        assert_eq!(trail, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn call_with_starts_with_a_fault() {
        let mut chain = Chain::new();
        chain.append(vec![pass("0"), recover("1")]).unwrap();

        let mut res = Res::default();
        let outcome = chain
            .as_fn()
            .call_with(Some(ApiError::new("early").into()), &mut Req, &mut res)
            .await;
        assert!(outcome.unwrap().is_none());
        assert_eq!(res.trail, vec!["1:early"]);
    }

    #[tokio::test]
    async fn nested_chain_fn_runs_as_one_unit() {
        let mut inner = Chain::new();
        inner.append(vec![pass("i0"), raise("i1", "inner")]).unwrap();

        let mut outer = Chain::new();
        outer.append(pass("o0")).unwrap();
        outer.use_handler(inner.as_fn());
        outer.append(vec![pass("o1"), recover("o2")]).unwrap();

        let (outcome, trail) = run(&outer).await;
        assert!(outcome.unwrap().is_none());
        assert_eq!(trail, vec!["o0", "i0", "i1", "o2:inner"]);
    }

    #[tokio::test]
    async fn as_fn_is_a_snapshot() {
        let mut chain = Chain::new();
        chain.append(pass("0")).unwrap();
        let snapshot = chain.as_fn();
        chain.append(pass("1")).unwrap();

        let mut res = Res::default();
        snapshot.call(&mut Req, &mut res).await.unwrap();
        assert_eq!(res.trail, vec!["0"]);
        assert_eq!(chain.as_fn().len(), 2);
    }

    #[tokio::test]
    async fn units_may_suspend_before_continuing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain: Chain<Req, Res> = Chain::new();
        for i in 0..3u64 {
            let seen = Arc::clone(&seen);
            chain
                .append(handler_fn(move |_req: &mut Req, _res: &mut Res| {
                    let seen = Arc::clone(&seen);
                    Box::pin(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(5 * (3 - i))).await;
                        seen.lock().push(i);
                        Ok(Next::Continue)
                    })
                }))
                .unwrap();
        }

        run(&chain).await.0.unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn normal_units_run_once_in_append_order(n in 0usize..24) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .build()
                .unwrap();
            let labels: Vec<&'static str> = (0..n)
                .map(|i| &*Box::leak(i.to_string().into_boxed_str()))
                .collect();

            let mut chain = Chain::new();
            for label in &labels {
                chain.append(pass(*label)).unwrap();
            }

            let (outcome, trail) = runtime.block_on(run(&chain));
            prop_assert!(outcome.unwrap().is_none());
            prop_assert_eq!(trail, labels.iter().map(ToString::to_string).collect::<Vec<_>>());
        }

        #[test]
        fn error_at_k_skips_every_later_normal_unit(n in 1usize..16, k in 0usize..16) {
            let k = k % n;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_time()
                .build()
                .unwrap();

            let mut chain = Chain::new();
            for i in 0..n {
                if i == k {
                    chain.append(raise("k", "stop")).unwrap();
                } else {
                    chain.append(pass("n")).unwrap();
                }
            }

            let (outcome, trail) = runtime.block_on(run(&chain));
            prop_assert!(outcome.unwrap().is_some());
            prop_assert_eq!(trail.len(), k + 1);
        }
    }
}
