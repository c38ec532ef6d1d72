//! Single-resolution deferred values.
//!
//! A [`Deferred`] is settled at most once, either fulfilled with a value or
//! rejected with a reason. Continuations attached with [`Deferred::done`] or
//! [`Deferred::then`] never run inline with the caller that attached them;
//! they always go through the [`Schedule`] the container was built with.
//!
//! ```
//! use deferred::{Deferred, Error, Settleable, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let answer: Deferred<i32> = Deferred::new(queue.clone(), |resolve, _reject| {
//!     resolve.fulfill(41);
//!     Ok(())
//! });
//! let next = answer.and_then(|v| Ok(Settleable::Value(v + 1)));
//!
//! queue.run_until_idle();
//! assert_eq!(next.peek(), Some(Ok::<_, Error>(42)));
//! ```
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub mod deferred;
pub mod resolve;
pub mod schedule;
pub mod settled;
mod state;

pub use deferred::Deferred;
pub use resolve::{Probe, Reject, Resolve, Settleable, Thenable};
pub use schedule::{Schedule, Task, TaskQueue};
pub use settled::Settled;
pub use state::State;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Rejected(String),
    #[error("producer panicked: {0}")]
    Producer(String),
    #[error("thenable probe panicked: {0}")]
    Probe(String),
    #[error("thenable registration panicked: {0}")]
    Thenable(String),
    #[error("continuation panicked: {0}")]
    Continuation(String),
    #[error("deferred was resolved with itself")]
    SelfResolution,
    #[error("deferred was dropped before it settled")]
    Abandoned,
}

impl Error {
    pub fn rejected(message: impl Into<String>) -> Self {
        Error::Rejected(message.into())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// Bounds every rejection reason has to meet.
///
/// Captured panics and crate-level failures are reported as an [`Error`] and
/// converted into the caller's reason type.
pub trait Reason: Clone + From<Error> + 'static {}

impl<E> Reason for E where E: Clone + From<Error> + 'static {}

/// Runs `f`, turning a panic into its message.
pub(crate) fn guard<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(&payload))
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_value_through() {
        assert_eq!(guard(|| 7), Ok(7));
    }

    #[test]
    fn test_guard_captures_panic_message() {
        assert_eq!(guard(|| panic!("boom")), Err::<(), _>("boom".to_string()));
        let owned = String::from("owned boom");
        assert_eq!(
            guard(move || std::panic::panic_any(owned)),
            Err::<(), _>("owned boom".to_string())
        );
        assert_eq!(
            guard(|| std::panic::panic_any(3_u8)),
            Err::<(), _>("unknown panic".to_string())
        );
    }

    #[test]
    fn test_error_into_string_reason() {
        let reason: String = Error::rejected("boom").into();
        assert_eq!(reason, "boom");
        let reason: String = Error::SelfResolution.into();
        assert_eq!(reason, "deferred was resolved with itself");
    }
}
