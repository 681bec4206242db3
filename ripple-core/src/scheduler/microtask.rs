//! Deferred scheduler.
//!
//! Scheduling only enqueues. The first schedule of a synchronous turn asks
//! the [`MicrotaskQueue`] for one callback, and that callback drains the whole
//! queue. Everything scheduled before the callback fires therefore lands in a
//! single flush, in enqueue order.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::queue::{ErrorHook, Task, TaskQueue};
use super::TaskScheduler;

/// A callback handed to a microtask backend.
pub type Microtask = Box<dyn FnOnce()>;

/// Something able to run a callback "soon", after the current synchronous
/// turn.
pub trait MicrotaskQueue {
    /// Arrange for `callback` to run once the current turn is over.
    fn queue_microtask(&self, callback: Microtask);
}

/// A microtask backend owned by the host.
///
/// Callbacks accumulate until [`ManualMicrotasks::run`] is called, which is
/// how tests and custom event loops mark the end of a turn.
#[derive(Default)]
pub struct ManualMicrotasks {
    pending: RefCell<VecDeque<Microtask>>,
}

impl ManualMicrotasks {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run callbacks until none are left, including ones queued by the
    /// callbacks themselves. Returns how many ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(callback) = next else {
                return ran;
            };
            callback();
            ran += 1;
        }
    }

    /// Number of callbacks waiting.
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether no callback is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

impl MicrotaskQueue for ManualMicrotasks {
    fn queue_microtask(&self, callback: Microtask) {
        self.pending.borrow_mut().push_back(callback);
    }
}

/// Spawns each callback on the current tokio `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioMicrotasks;

impl MicrotaskQueue for TokioMicrotasks {
    fn queue_microtask(&self, callback: Microtask) {
        tokio::task::spawn_local(async move { callback() });
    }
}

struct Shared {
    queue: TaskQueue,
    flush_requested: Cell<bool>,
    microtasks: Rc<dyn MicrotaskQueue>,
}

impl Shared {
    fn request_flush(self: &Rc<Self>) {
        if self.flush_requested.replace(true) {
            return;
        }
        let weak = Rc::downgrade(self);
        self.microtasks.queue_microtask(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.flush_requested.set(false);
                let ran = shared.queue.drain();
                tracing::trace!(ran, "microtask flush");
            }
        }));
    }
}

/// Runs scheduled tasks in a later microtask, coalescing bursts.
pub struct MicrotaskScheduler {
    shared: Rc<Shared>,
}

impl MicrotaskScheduler {
    /// Create a scheduler over the given backend.
    pub fn new(microtasks: Rc<dyn MicrotaskQueue>) -> Self {
        Self::build(microtasks, None)
    }

    /// Create a scheduler with its own task error hook.
    pub fn with_error_hook(microtasks: Rc<dyn MicrotaskQueue>, on_error: ErrorHook) -> Self {
        Self::build(microtasks, Some(on_error))
    }

    fn build(microtasks: Rc<dyn MicrotaskQueue>, on_error: Option<ErrorHook>) -> Self {
        Self {
            shared: Rc::new(Shared {
                queue: TaskQueue::new(on_error),
                flush_requested: Cell::new(false),
                microtasks,
            }),
        }
    }
}

impl TaskScheduler for MicrotaskScheduler {
    fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    fn schedule(&self, task: Task) {
        let queue = &self.shared.queue;
        queue.push(task);
        if !queue.is_draining() && !queue.is_paused() {
            self.shared.request_flush();
        }
    }

    fn execute(&self) {
        self.shared.queue.drain();
    }

    fn pause(&self) {
        self.shared.queue.set_paused(true);
    }

    fn resume(&self) {
        self.shared.queue.set_paused(false);
        if !self.shared.queue.is_empty() {
            self.shared.request_flush();
        }
    }

    fn is_sync(&self) -> bool {
        false
    }
}
