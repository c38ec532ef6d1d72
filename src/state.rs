//! The settle-once cell behind every [`Deferred`](crate::Deferred).
use std::cell::RefCell;
use std::fmt::Debug;
use std::mem;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::guard;
use crate::schedule::Schedule;

/// Lifecycle of a deferred value. Moves from `Pending` to one of the two
/// settled states at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// A fulfillment/rejection callback pair waiting on a cell.
///
/// Observing without reacting is `Continuation::new(|_| {}, |_| {})`.
pub(crate) struct Continuation<T, E> {
    on_fulfilled: Box<dyn FnOnce(T)>,
    on_rejected: Box<dyn FnOnce(E)>,
}

impl<T, E> Continuation<T, E> {
    pub(crate) fn new<F, R>(on_fulfilled: F, on_rejected: R) -> Self
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        Continuation {
            on_fulfilled: Box::new(on_fulfilled),
            on_rejected: Box::new(on_rejected),
        }
    }

    fn dispatch(self, outcome: Result<T, E>) {
        let Continuation { on_fulfilled, on_rejected } = self;
        let ran = match outcome {
            Ok(value) => guard(move || on_fulfilled(value)),
            Err(reason) => guard(move || on_rejected(reason)),
        };
        if let Err(message) = ran {
            warn!(%message, "continuation panicked");
        }
    }
}

enum Slot<T, E> {
    Pending(Vec<Continuation<T, E>>),
    Fulfilled(T),
    Rejected(E),
}

pub(crate) struct StateCell<T, E> {
    slot: RefCell<Slot<T, E>>,
    scheduler: Rc<dyn Schedule>,
}

impl<T: Clone + 'static, E: Clone + 'static> StateCell<T, E> {
    pub(crate) fn new(scheduler: Rc<dyn Schedule>) -> Self {
        StateCell {
            slot: RefCell::new(Slot::Pending(Vec::new())),
            scheduler,
        }
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn Schedule> {
        &self.scheduler
    }

    pub(crate) fn state(&self) -> State {
        match *self.slot.borrow() {
            Slot::Pending(_) => State::Pending,
            Slot::Fulfilled(_) => State::Fulfilled,
            Slot::Rejected(_) => State::Rejected,
        }
    }

    pub(crate) fn snapshot(&self) -> Option<Result<T, E>> {
        match &*self.slot.borrow() {
            Slot::Pending(_) => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Returns `false` if the cell had already settled.
    pub(crate) fn fulfill(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Returns `false` if the cell had already settled.
    pub(crate) fn reject(&self, reason: E) -> bool {
        self.settle(Err(reason))
    }

    /// Each waiting continuation gets its own task, in registration order, so
    /// settling a long chain never nests one link inside another.
    fn settle(&self, outcome: Result<T, E>) -> bool {
        let waiting = {
            let mut slot = self.slot.borrow_mut();
            let waiting = match &mut *slot {
                Slot::Pending(waiting) => mem::take(waiting),
                _ => {
                    debug!("ignoring settle on an already settled cell");
                    return false;
                }
            };
            *slot = match outcome.clone() {
                Ok(value) => Slot::Fulfilled(value),
                Err(reason) => Slot::Rejected(reason),
            };
            waiting
        };
        trace!(state = ?self.state(), waiting = waiting.len(), "settled");
        for continuation in waiting {
            let outcome = outcome.clone();
            self.scheduler
                .schedule(Box::new(move || continuation.dispatch(outcome)));
        }
        true
    }

    /// Queues `continuation` while pending, otherwise runs the matching side
    /// against the settled outcome right away.
    ///
    /// Callers reach this only from a scheduled task, never inline with the
    /// code that attached the continuation.
    pub(crate) fn register_or_dispatch(&self, continuation: Continuation<T, E>) {
        let outcome = {
            let mut slot = self.slot.borrow_mut();
            match &mut *slot {
                Slot::Pending(waiting) => {
                    waiting.push(continuation);
                    return;
                }
                Slot::Fulfilled(value) => Ok(value.clone()),
                Slot::Rejected(reason) => Err(reason.clone()),
            }
        };
        continuation.dispatch(outcome);
    }
}

impl<T, E> Debug for StateCell<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.slot.try_borrow().as_deref() {
            Ok(Slot::Pending(_)) => "Pending",
            Ok(Slot::Fulfilled(_)) => "Fulfilled",
            Ok(Slot::Rejected(_)) => "Rejected",
            Err(_) => "<borrowed>",
        };
        f.debug_struct("StateCell").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskQueue;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(String)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &str| -> Box<dyn Fn(String)> {
            let sink = sink.clone();
            let tag = tag.to_string();
            Box::new(move |v: String| sink.borrow_mut().push(format!("{tag}:{v}")))
        };
        (log, make)
    }

    fn cell<T: Clone + 'static, E: Clone + 'static>(queue: &TaskQueue) -> StateCell<T, E> {
        StateCell::new(Rc::new(queue.clone()))
    }

    #[test]
    fn test_fulfill_dispatches_in_registration_order() {
        let queue = TaskQueue::new();
        let cell = cell::<String, String>(&queue);
        let (log, make) = recorder();
        for tag in ["a", "b", "c"] {
            let on_ok = make(tag);
            let on_err = make("err");
            cell.register_or_dispatch(Continuation::new(move |v| on_ok(v), move |e| on_err(e)));
        }
        assert!(log.borrow().is_empty());
        assert!(cell.fulfill("1".into()));
        assert_eq!(cell.state(), State::Fulfilled);
        // Settling only schedules, one task per continuation.
        assert!(log.borrow().is_empty());
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn test_settle_only_once() {
        let queue = TaskQueue::new();
        let cell = cell::<String, String>(&queue);
        let (log, make) = recorder();
        let on_ok = make("ok");
        let on_err = make("err");
        cell.register_or_dispatch(Continuation::new(move |v| on_ok(v), move |e| on_err(e)));

        assert!(cell.reject("boom".into()));
        assert!(!cell.fulfill("late".into()));
        assert!(!cell.reject("again".into()));
        queue.run_until_idle();

        assert_eq!(*log.borrow(), vec!["err:boom"]);
        assert_eq!(cell.snapshot(), Some(Err("boom".to_string())));
    }

    #[test]
    fn test_register_after_settle_dispatches_matching_side() {
        let queue = TaskQueue::new();
        let cell = cell::<String, String>(&queue);
        cell.fulfill("done".into());
        let (log, make) = recorder();
        let on_ok = make("ok");
        let on_err = make("err");
        cell.register_or_dispatch(Continuation::new(move |v| on_ok(v), move |e| on_err(e)));
        assert_eq!(*log.borrow(), vec!["ok:done"]);
    }

    #[test]
    fn test_observe_only_pair_dispatches_nothing() {
        let queue = TaskQueue::new();
        let cell = cell::<u32, String>(&queue);
        cell.register_or_dispatch(Continuation::new(|_| {}, |_| {}));
        assert!(cell.fulfill(3));
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(cell.snapshot(), Some(Ok(3)));
    }

    #[test]
    fn test_continuation_may_reenter_cell() {
        let queue = TaskQueue::new();
        let cell = Rc::new(cell::<u32, String>(&queue));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (inner_cell, inner_seen) = (cell.clone(), seen.clone());
        cell.register_or_dispatch(Continuation::new(
            move |v| {
                inner_seen.borrow_mut().push(v);
                let again = inner_seen.clone();
                inner_cell.register_or_dispatch(Continuation::new(
                    move |v| again.borrow_mut().push(v + 1),
                    |_| {},
                ));
            },
            |_| {},
        ));
        cell.fulfill(1);
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_continuation_does_not_stop_the_rest() {
        let queue = TaskQueue::new();
        let cell = cell::<u32, String>(&queue);
        let seen = Rc::new(RefCell::new(Vec::new()));
        cell.register_or_dispatch(Continuation::new(|_| panic!("observer"), |_| {}));
        let sink = seen.clone();
        cell.register_or_dispatch(Continuation::new(move |v| sink.borrow_mut().push(v), |_| {}));
        assert!(cell.fulfill(5));
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![5]);
    }
}
