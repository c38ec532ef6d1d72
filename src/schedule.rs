//! The "run later" port deferred values dispatch through.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;
use tracing::{trace, warn};

/// A unit of work handed to a [`Schedule`].
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after the current synchronous execution has finished.
///
/// Implementations must never run `task` inside the call to `schedule`.
/// Tasks scheduled from the same thread should run in the order they were
/// scheduled.
pub trait Schedule {
    fn schedule(&self, task: Task);
}

impl<S: Schedule + ?Sized> Schedule for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

impl<S: Schedule + ?Sized> Schedule for Box<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

/// Spawns each task onto the `LocalPool` that owns this spawner.
///
/// The pool decides the order spawned tasks run in, so tasks are not
/// guaranteed to run in the order they were scheduled. Use a [`TaskQueue`]
/// where that order matters.
impl Schedule for LocalSpawner {
    fn schedule(&self, task: Task) {
        if let Err(err) = self.spawn_local(async move { task() }) {
            warn!(%err, "local pool refused task, dropping it");
        }
    }
}

/// A FIFO queue of tasks drained by its owner.
///
/// Clones share the same queue.
///
/// # Examples
///
/// ```
/// use deferred::{Schedule, TaskQueue};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let queue = TaskQueue::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// queue.schedule(Box::new(move || flag.set(true)));
/// assert!(!ran.get());
/// assert_eq!(queue.run_until_idle(), 1);
/// assert!(ran.get());
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the oldest task. Returns `false` if there was none.
    pub fn run_once(&self) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs at most `limit` tasks, including ones scheduled along the way.
    pub fn run(&self, limit: usize) -> usize {
        let mut ran = 0;
        while ran < limit && self.run_once() {
            ran += 1;
        }
        trace!(ran, remaining = self.len(), "task queue drained");
        ran
    }

    /// Runs tasks until none are left and returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        self.run(usize::MAX)
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        let mut tasks = self.tasks.borrow_mut();
        tasks.push_back(task);
        trace!(queued = tasks.len(), "task scheduled");
    }
}

impl Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("queued", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    fn push(log: &Rc<RefCell<Vec<u32>>>, n: u32) -> Task {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(n))
    }

    #[test]
    fn test_queue_runs_in_fifo_order() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            queue.schedule(push(&log, n));
        }
        assert_eq!(queue.len(), 3);
        assert!(log.borrow().is_empty());
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_scheduled_while_running_go_last() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (inner, inner_log) = (queue.clone(), log.clone());
        queue.schedule(Box::new(move || {
            inner_log.borrow_mut().push(0);
            inner.schedule(push(&inner_log, 2));
        }));
        queue.schedule(push(&log, 1));
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_run_respects_limit() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 0..5 {
            queue.schedule(push(&log, n));
        }
        assert_eq!(queue.run(2), 2);
        assert_eq!(queue.len(), 3);
        assert!(!TaskQueue::new().run_once());
    }

    #[test]
    fn test_local_spawner_defers_to_pool() {
        let mut pool = LocalPool::new();
        let spawner: Rc<dyn Schedule> = Rc::new(pool.spawner());
        let log = Rc::new(RefCell::new(Vec::new()));
        spawner.schedule(push(&log, 1));
        spawner.schedule(push(&log, 2));
        assert!(log.borrow().is_empty());
        pool.run_until_stalled();
        // Order is up to the pool.
        let mut ran = log.borrow().clone();
        ran.sort_unstable();
        assert_eq!(ran, vec![1, 2]);
    }

    #[test]
    fn test_boxed_scheduler_drives_deferred() {
        use crate::{Deferred, Settleable};

        let queue = TaskQueue::new();
        let boxed = Box::new(queue.clone()) as Box<dyn Schedule>;
        let d: Deferred<u32> = Deferred::resolved(boxed, 6);
        let next = d.and_then(|v| Ok(Settleable::Value(v + 1)));
        assert!(!queue.is_empty());
        queue.run_until_idle();
        assert_eq!(next.peek(), Some(Ok(7)));
    }
}
