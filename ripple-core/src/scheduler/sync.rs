//! Synchronous scheduler: tasks run in the caller's stack frame unless the
//! scheduler is paused or already draining.

use super::queue::{ErrorHook, Task, TaskQueue};
use super::TaskScheduler;

/// Runs scheduled tasks immediately.
pub struct SyncScheduler {
    queue: TaskQueue,
}

impl SyncScheduler {
    /// Create a scheduler that reports task errors to the global reporter.
    pub fn new() -> Self {
        Self {
            queue: TaskQueue::new(None),
        }
    }

    /// Create a scheduler with its own error hook.
    pub fn with_error_hook(on_error: ErrorHook) -> Self {
        Self {
            queue: TaskQueue::new(Some(on_error)),
        }
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for SyncScheduler {
    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn schedule(&self, task: Task) {
        self.queue.push(task);
        if !self.queue.is_paused() {
            self.execute();
        }
    }

    fn execute(&self) {
        self.queue.drain();
    }

    fn pause(&self) {
        self.queue.set_paused(true);
    }

    fn resume(&self) {
        self.queue.set_paused(false);
        if !self.queue.is_empty() {
            self.execute();
        }
    }

    fn is_sync(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn schedule_runs_immediately() {
        let scheduler = SyncScheduler::new();
        let ran = Rc::new(RefCell::new(false));
        let ran_clone = ran.clone();

        scheduler.schedule(Box::new(move || {
            *ran_clone.borrow_mut() = true;
            Ok(())
        }));

        assert!(*ran.borrow());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn nested_schedule_is_appended_not_recursed() {
        let scheduler = Rc::new(SyncScheduler::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_scheduler = scheduler.clone();
        let outer_log = log.clone();
        scheduler.schedule(Box::new(move || {
            outer_log.borrow_mut().push("outer:start");
            let inner_log = outer_log.clone();
            inner_scheduler.schedule(Box::new(move || {
                inner_log.borrow_mut().push("inner");
                Ok(())
            }));
            outer_log.borrow_mut().push("outer:end");
            Ok(())
        }));

        assert_eq!(*log.borrow(), vec!["outer:start", "outer:end", "inner"]);
    }

    #[test]
    fn paused_scheduler_defers_until_resume() {
        let scheduler = SyncScheduler::new();
        let count = Rc::new(RefCell::new(0));

        scheduler.pause();
        for _ in 0..3 {
            let count = count.clone();
            scheduler.schedule(Box::new(move || {
                *count.borrow_mut() += 1;
                Ok(())
            }));
        }
        assert_eq!(*count.borrow(), 0);
        assert!(!scheduler.is_empty());

        scheduler.resume();
        assert_eq!(*count.borrow(), 3);
        assert!(scheduler.is_empty());
    }
}
