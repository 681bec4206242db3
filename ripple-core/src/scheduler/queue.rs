//! FIFO task queue shared by both schedulers, plus the process-wide error
//! reporter used when a scheduler has no hook of its own.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ReactiveError, Result};

/// A unit of scheduled work.
pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// Receives errors returned by scheduled tasks.
pub type ErrorHook = Rc<dyn Fn(&ReactiveError)>;

type Reporter = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

static REPORTER: RwLock<Option<Reporter>> = parking_lot::const_rwlock(None);

/// Install the process-wide reporter for task errors.
///
/// Schedulers created without an explicit error hook forward to it.
pub fn set_error_reporter<F>(reporter: F)
where
    F: Fn(&ReactiveError) + Send + Sync + 'static,
{
    *REPORTER.write() = Some(Arc::new(reporter));
}

/// Restore the default reporter, which logs through `tracing`.
pub fn reset_error_reporter() {
    *REPORTER.write() = None;
}

/// Report an error through the process-wide reporter.
pub fn report_error(error: &ReactiveError) {
    // Clone out of the lock so a reporter may replace itself.
    let reporter = REPORTER.read().clone();
    match reporter {
        Some(reporter) => reporter(error),
        None => tracing::error!(%error, "unhandled error in scheduled task"),
    }
}

/// The queue and drain loop behind every scheduler.
pub(crate) struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
    draining: Cell<bool>,
    paused: Cell<bool>,
    on_error: ErrorHook,
}

impl TaskQueue {
    pub(crate) fn new(on_error: Option<ErrorHook>) -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            paused: Cell::new(false),
            on_error: on_error.unwrap_or_else(|| Rc::new(report_error) as ErrorHook),
        }
    }

    pub(crate) fn push(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.get()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.get()
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.set(paused);
    }

    /// Run queued tasks until the queue is empty or the queue gets paused.
    ///
    /// Returns the number of tasks that ran. A nested call returns 0.
    pub(crate) fn drain(&self) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        let _guard = DrainGuard(&self.draining);

        let mut ran = 0;
        while !self.paused.get() {
            let task = self.tasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            ran += 1;
            if let Err(error) = task() {
                (self.on_error)(&error);
            }
        }
        ran
    }
}

/// Clears the draining flag even if a task panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |n: u32| -> Task {
            let log = log_clone.clone();
            Box::new(move || {
                log.borrow_mut().push(n);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = TaskQueue::new(None);
        let (log, task) = recorder();

        queue.push(task(1));
        queue.push(task(2));
        queue.push(task(3));

        assert_eq!(queue.drain(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn failing_task_does_not_stop_the_drain() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let errors_clone = errors.clone();
        let hook: ErrorHook = Rc::new(move |e: &ReactiveError| {
            errors_clone.borrow_mut().push(e.to_string());
        });
        let queue = TaskQueue::new(Some(hook));
        let (log, task) = recorder();

        queue.push(task(1));
        queue.push(Box::new(|| Err(ReactiveError::msg("boom"))));
        queue.push(task(2));
        queue.drain();

        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(*errors.borrow(), vec!["boom".to_string()]);
    }

    #[test]
    fn paused_queue_keeps_remaining_tasks() {
        let queue = Rc::new(TaskQueue::new(None));
        let (log, task) = recorder();

        let pauser = queue.clone();
        queue.push(task(1));
        queue.push(Box::new(move || {
            pauser.set_paused(true);
            Ok(())
        }));
        queue.push(task(2));

        assert_eq!(queue.drain(), 2);
        assert_eq!(*log.borrow(), vec![1]);
        assert!(!queue.is_empty());

        queue.set_paused(false);
        queue.drain();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn global_reporter_receives_errors() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        set_error_reporter(move |e| seen_clone.lock().push(e.to_string()));

        report_error(&ReactiveError::msg("reported"));
        reset_error_reporter();

        assert!(seen.lock().iter().any(|e| e == "reported"));
    }
}
