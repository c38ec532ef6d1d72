use std::fmt::Debug;
use std::future::IntoFuture;
use std::rc::Rc;

use crate::resolve::{run_latched, Reject, Resolve, Settleable, Thenable};
use crate::schedule::Schedule;
use crate::settled::Settled;
use crate::state::{Continuation, State, StateCell};
use crate::{guard, Error, Reason};

/// The eventual result of an operation, settled at most once.
///
/// Cloning gives another handle to the same container.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, Error, Settleable, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let failed: Deferred<u32> = Deferred::rejected(queue.clone(), Error::rejected("boom"));
/// let recovered = failed
///     .forward()
///     .catch(|_reason| Ok(Settleable::Value(0)));
///
/// queue.run_until_idle();
/// assert_eq!(recovered.peek(), Some(Ok(0)));
/// ```
pub struct Deferred<T, E = Error> {
    cell: Rc<StateCell<T, E>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").field("cell", &self.cell).finish_non_exhaustive()
    }
}

impl<T: Clone + 'static, E: Reason> Deferred<T, E> {
    /// Builds a container and runs `producer` with its settle handles before
    /// returning.
    ///
    /// Returning `Err` or panicking from `producer` rejects the container,
    /// unless one of the handles was already used.
    pub fn new<S, F>(scheduler: S, producer: F) -> Self
    where
        S: Schedule + 'static,
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        Self::with_scheduler(Rc::new(scheduler), producer)
    }

    pub fn with_scheduler<F>(scheduler: Rc<dyn Schedule>, producer: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let cell = Rc::new(StateCell::new(scheduler));
        run_latched(&cell, Error::Producer, producer);
        Deferred { cell }
    }

    pub fn resolved<S: Schedule + 'static>(scheduler: S, value: T) -> Self {
        Self::new(scheduler, move |resolve, _| {
            resolve.fulfill(value);
            Ok(())
        })
    }

    pub fn rejected<S: Schedule + 'static>(scheduler: S, reason: E) -> Self {
        Self::new(scheduler, move |_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    pub fn state(&self) -> State {
        self.cell.state()
    }

    /// A copy of the outcome, or `None` while pending.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.cell.snapshot()
    }

    /// Attaches an observer pair. Exactly one side runs, once, from a
    /// scheduled task, even if the container has already settled.
    pub fn done<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let cell = self.cell.clone();
        let continuation = Continuation::new(on_fulfilled, on_rejected);
        self.cell
            .scheduler()
            .schedule(Box::new(move || cell.register_or_dispatch(continuation)));
    }

    /// Chains a new container settled by whichever handler matches this
    /// container's outcome.
    ///
    /// `Ok` from a handler resolves the new container, so a returned thenable
    /// is adopted. `Err` or a panic rejects it.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Settleable<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Settleable<U, E>, E> + 'static,
    {
        let source = self.clone();
        Deferred::with_scheduler(self.cell.scheduler().clone(), move |resolve, reject| {
            let (resolve_err, reject_err) = (resolve.clone(), reject.clone());
            source.done(
                move |value| react(&resolve, &reject, on_fulfilled, value),
                move |reason| react(&resolve_err, &reject_err, on_rejected, reason),
            );
            Ok(())
        })
    }

    /// [`then`](Self::then) where a rejection passes through unchanged.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Settleable<U, E>, E> + 'static,
    {
        self.then(on_fulfilled, Err)
    }

    /// [`then`](Self::then) where a fulfillment passes through unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Deferred<T, E>
    where
        R: FnOnce(E) -> Result<Settleable<T, E>, E> + 'static,
    {
        self.then(|value| Ok(Settleable::Value(value)), on_rejected)
    }

    /// [`then`](Self::then) with no handlers: the new container ends up with
    /// the same outcome as this one.
    pub fn forward(&self) -> Deferred<T, E> {
        self.then(|value| Ok(Settleable::Value(value)), Err)
    }

    /// A future resolving to the outcome.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::observe(self)
    }
}

fn react<A, U, E, H>(resolve: &Resolve<U, E>, reject: &Reject<U, E>, handler: H, arg: A)
where
    U: Clone + 'static,
    E: Reason,
    H: FnOnce(A) -> Result<Settleable<U, E>, E>,
{
    match guard(move || handler(arg)) {
        Ok(Ok(next)) => resolve.resolve(next),
        Ok(Err(reason)) => reject.reject(reason),
        Err(message) => reject.reject(E::from(Error::Continuation(message))),
    }
}

impl<T: Clone + 'static, E: Reason> Thenable<T, E> for Deferred<T, E> {
    fn register(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E> {
        if resolve.targets(&self.cell) {
            return Err(E::from(Error::SelfResolution));
        }
        self.done(move |value| resolve.fulfill(value), move |reason| reject.reject(reason));
        Ok(())
    }
}

impl<T: Clone + 'static, E: Reason> From<Deferred<T, E>> for Settleable<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Settleable::adopt(deferred)
    }
}

impl<T: Clone + 'static, E: Reason> IntoFuture for Deferred<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.settled()
    }
}
