//! Task Scheduling
//!
//! Effects never run directly from a producer's notification. They hand a
//! task to a scheduler, which decides when the task runs.
//!
//! # Overview
//!
//! Two schedulers share the same contract ([`TaskScheduler`]) and the same
//! FIFO queue:
//!
//! - [`SyncScheduler`] drains immediately in the caller's stack frame.
//! - [`MicrotaskScheduler`] requests a single microtask per synchronous turn,
//!   so any number of schedules coalesce into one flush.
//!
//! # Guarantees
//!
//! 1. Tasks run in enqueue order.
//! 2. Draining is not reentrant. A task that schedules more work appends to
//!    the queue and the running drain loop picks it up.
//! 3. A failing task is reported through the scheduler's error hook and the
//!    rest of the queue still runs.
//! 4. A paused scheduler leaves its remaining tasks queued until `resume()`.

mod local;
mod microtask;
mod queue;
mod sync;

pub use local::LocalTasks;
pub use microtask::{ManualMicrotasks, Microtask, MicrotaskQueue, MicrotaskScheduler, TokioMicrotasks};
pub use queue::{report_error, reset_error_reporter, set_error_reporter, ErrorHook, Task};
pub use sync::SyncScheduler;

/// Common contract of the synchronous and deferred schedulers.
pub trait TaskScheduler {
    /// Whether no task is waiting.
    fn is_empty(&self) -> bool;

    /// Queue a task. Depending on the implementation it may run right away.
    fn schedule(&self, task: Task);

    /// Drain the queue now. A nested call during a drain is a no-op.
    fn execute(&self);

    /// Stop draining after the current task.
    fn pause(&self);

    /// Allow draining again and flush whatever is queued.
    fn resume(&self);

    /// Whether scheduled tasks run in the caller's stack frame.
    fn is_sync(&self) -> bool;
}
