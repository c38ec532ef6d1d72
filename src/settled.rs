use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;
use std::{
    future::Future,
    task::{Poll, Waker},
};

use crate::{Deferred, Error, Reason};

/// A future for the outcome of a [`Deferred`].
///
/// The outcome is observed through [`Deferred::done`], so the scheduler the
/// container was built with has to run for this future to complete.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, Error, Settleable};
/// use futures::executor::LocalPool;
///
/// let mut pool = LocalPool::new();
/// let answer: Deferred<i32> = Deferred::resolved(pool.spawner(), 20);
/// let doubled = answer.and_then(|v| Ok(Settleable::Value(v * 2)));
/// assert_eq!(pool.run_until(doubled.settled()), Ok(40));
/// ```
pub struct Settled<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Inner<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Delivers the outcome. Dropping it without delivering wakes the waiting
/// future with [`Error::Abandoned`].
struct Notifier<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Notifier<T, E> {
    fn deliver(&self, outcome: Result<T, E>) {
        let waker = {
            let mut inner = self.inner.borrow_mut();
            inner.value = Some(outcome);
            std::mem::replace(&mut inner.waker, Err(WakerState::Tainted))
        };
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Drop for Notifier<T, E> {
    fn drop(&mut self) {
        let waker = std::mem::replace(&mut self.inner.borrow_mut().waker, Err(WakerState::Tainted));
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T: Clone + 'static, E: Reason> Settled<T, E> {
    pub(crate) fn observe(deferred: &Deferred<T, E>) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let on_fulfilled = Rc::new(Notifier { inner: inner.clone() });
        let on_rejected = on_fulfilled.clone();
        deferred.done(
            move |value| on_fulfilled.deliver(Ok(value)),
            move |reason| on_rejected.deliver(Err(reason)),
        );
        Settled { inner }
    }
}

impl<T, E: From<Error>> Future for Settled<T, E> {
    type Output = Result<T, E>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match inner.value.take() {
            Some(value) => Poll::Ready(value),
            None => match std::mem::replace(&mut inner.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => Poll::Ready(Err(E::from(Error::Abandoned))),
                _ => Poll::Pending,
            },
        }
    }
}

impl<T, E> Debug for Settled<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ready = self.inner.try_borrow().map(|inner| inner.value.is_some()).unwrap_or(false);
        f.debug_struct("Settled").field("ready", &ready).finish()
    }
}
