//! Local futures driven by the manual microtask loop.
//!
//! Without a tokio `LocalSet` there is nothing to poll the futures returned
//! by async effect actions. [`LocalTasks`] keeps them on the runtime and
//! polls the ones that were woken each time the host runs microtasks.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use futures_util::task::{waker, ArcWake};

struct WakeFlag {
    woken: AtomicBool,
}

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
    }
}

struct LocalTask {
    flag: Arc<WakeFlag>,
    future: LocalBoxFuture<'static, ()>,
}

/// A single-threaded pool of spawned futures.
#[derive(Default)]
pub struct LocalTasks {
    tasks: RefCell<Vec<LocalTask>>,
}

impl LocalTasks {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a future. It is polled on the next [`LocalTasks::poll_woken`].
    pub fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        self.tasks.borrow_mut().push(LocalTask {
            flag: Arc::new(WakeFlag {
                woken: AtomicBool::new(true),
            }),
            future,
        });
    }

    /// Poll every woken future once. Returns how many were polled.
    ///
    /// Futures spawned while polling wait for the next call.
    pub fn poll_woken(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        let (woken, idle): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|task| task.flag.woken.swap(false, Ordering::AcqRel));
        self.tasks.borrow_mut().extend(idle);

        let polled = woken.len();
        for mut task in woken {
            let waker = waker(task.flag.clone());
            let mut cx = Context::from_waker(&waker);
            if let Poll::Pending = task.future.as_mut().poll(&mut cx) {
                self.tasks.borrow_mut().push(task);
            }
        }
        polled
    }

    /// Number of futures that have not completed.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether every spawned future has completed.
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}
