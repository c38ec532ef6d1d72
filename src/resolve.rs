//! Resolution of candidate values, including adoption of thenables.
use std::cell::Cell;
use std::fmt::Debug;
use std::rc::Rc;

use tracing::debug;

use crate::state::StateCell;
use crate::{guard, Error, Reason};

/// Something used to settle a deferred value.
///
/// A plain value fulfills right away. A thenable is awaited and its outcome
/// adopted. An unprobed candidate has not been checked yet; probing may turn
/// it into either of the other two, or fail.
pub enum Settleable<T, E> {
    Value(T),
    Thenable(Rc<dyn Thenable<T, E>>),
    Unprobed(Box<dyn Probe<T, E>>),
}

impl<T, E> Settleable<T, E> {
    pub fn adopt(thenable: impl Thenable<T, E> + 'static) -> Self {
        Settleable::Thenable(Rc::new(thenable))
    }

    /// Defers the capability check to resolution time. A probe that returns
    /// `Err` or panics rejects the deferred being resolved.
    pub fn probe_with<F>(probe: F) -> Self
    where
        F: FnOnce() -> Result<Settleable<T, E>, E> + 'static,
    {
        Settleable::Unprobed(Box::new(probe))
    }
}

impl<T: Debug, E> Debug for Settleable<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Settleable::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Settleable::Thenable(_) => f.write_str("Thenable(..)"),
            Settleable::Unprobed(_) => f.write_str("Unprobed(..)"),
        }
    }
}

/// A foreign deferred value that accepts a fulfillment and a rejection
/// callback.
///
/// Implementations may call either handle any number of times, or return an
/// error after calling one. Only the first call has effect.
pub trait Thenable<T, E> {
    fn register(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E>;
}

/// The capability check for an [`Settleable::Unprobed`] candidate.
pub trait Probe<T, E> {
    fn probe(self: Box<Self>) -> Result<Settleable<T, E>, E>;
}

impl<T, E, F> Probe<T, E> for F
where
    F: FnOnce() -> Result<Settleable<T, E>, E>,
{
    fn probe(self: Box<Self>) -> Result<Settleable<T, E>, E> {
        (*self)()
    }
}

/// One-shot flag shared by the two handles of a single resolution attempt.
#[derive(Debug, Default)]
struct Latch(Cell<bool>);

impl Latch {
    /// `true` only the first time.
    fn fire(&self) -> bool {
        !self.0.replace(true)
    }
}

/// Fulfillment side handed to producers and thenables.
pub struct Resolve<T, E> {
    cell: Rc<StateCell<T, E>>,
    latch: Rc<Latch>,
}

/// Rejection side handed to producers and thenables.
pub struct Reject<T, E> {
    cell: Rc<StateCell<T, E>>,
    latch: Rc<Latch>,
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone(), latch: self.latch.clone() }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone(), latch: self.latch.clone() }
    }
}

impl<T, E> Debug for Resolve<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolve").field("cell", &self.cell).field("latch", &self.latch).finish()
    }
}

impl<T, E> Debug for Reject<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reject").field("cell", &self.cell).field("latch", &self.latch).finish()
    }
}

impl<T: Clone + 'static, E: Reason> Resolve<T, E> {
    /// Resolves with `candidate`, adopting it if it is a thenable.
    pub fn resolve(&self, candidate: Settleable<T, E>) {
        if self.latch.fire() {
            resolve(&self.cell, candidate);
        } else {
            debug!("ignoring resolve on a finished resolution attempt");
        }
    }

    pub fn fulfill(&self, value: T) {
        self.resolve(Settleable::Value(value));
    }

    pub(crate) fn targets(&self, cell: &Rc<StateCell<T, E>>) -> bool {
        Rc::ptr_eq(&self.cell, cell)
    }
}

impl<T: Clone + 'static, E: Reason> Reject<T, E> {
    pub fn reject(&self, reason: E) {
        if self.latch.fire() {
            self.cell.reject(reason);
        } else {
            debug!("ignoring reject on a finished resolution attempt");
        }
    }
}

/// Hands a fresh latched pair for `cell` to `f`.
///
/// An `Err` or a panic out of `f` rejects `cell` unless one of the handles
/// already fired. `origin` names the panic for the rejection reason.
pub(crate) fn run_latched<T, E, F>(cell: &Rc<StateCell<T, E>>, origin: fn(String) -> Error, f: F)
where
    T: Clone + 'static,
    E: Reason,
    F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
{
    let latch = Rc::new(Latch::default());
    let resolve = Resolve { cell: cell.clone(), latch: latch.clone() };
    let reject = Reject { cell: cell.clone(), latch };
    let fallback = reject.clone();
    match guard(move || f(resolve, reject)) {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => fallback.reject(reason),
        Err(message) => fallback.reject(E::from(origin(message))),
    }
}

/// Settles `cell` with `candidate`: fulfills plain values, adopts thenables
/// and rejects when probing fails.
pub(crate) fn resolve<T, E>(cell: &Rc<StateCell<T, E>>, candidate: Settleable<T, E>)
where
    T: Clone + 'static,
    E: Reason,
{
    let mut candidate = candidate;
    loop {
        match candidate {
            Settleable::Value(value) => {
                cell.fulfill(value);
                return;
            }
            Settleable::Thenable(thenable) => {
                debug!("adopting thenable");
                run_latched(cell, Error::Thenable, move |resolve, reject| {
                    thenable.register(resolve, reject)
                });
                return;
            }
            Settleable::Unprobed(probe) => match guard(move || probe.probe()) {
                Ok(Ok(next)) => candidate = next,
                Ok(Err(reason)) => {
                    cell.reject(reason);
                    return;
                }
                Err(message) => {
                    cell.reject(E::from(Error::Probe(message)));
                    return;
                }
            },
        }
    }
}
