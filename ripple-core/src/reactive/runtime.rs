//! Reactive Runtime
//!
//! The runtime is the context every atom, computed node, signal and effect
//! is created in. It is an explicit handle rather than a process-wide
//! singleton, so several isolated graphs can live side by side.
//!
//! # How It Works
//!
//! 1. Every accepted atom write advances the runtime's *clock*. A computed
//!    node compares the clock it last computed at with the current one to
//!    know it may be stale, without walking the graph.
//!
//! 2. An effect evaluates its source inside a *tracked run*. Atoms read
//!    during the run are collected and become the effect's dependencies.
//!
//! 3. When an atom changes it notifies its effects, which hand a task to
//!    either the synchronous or the microtask scheduler.
//!
//! 4. [`Runtime::batch`] pauses both schedulers, so a group of writes is
//!    observed as one change.
//!
//! # Thread Safety
//!
//! A runtime and everything created from it is single-threaded (`!Send`).

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use super::atom::{Atom, AtomOptions, WritableAtom};
use super::computed::{ComputeOptions, ComputedNode};
use super::context::{AtomSources, TrackingContext};
use super::effect::{self, ActionOutput, EffectContext, EffectOptions, EffectSource, EffectSubscription};
use super::signal::{Signal, SignalOptions};
use super::subscriber::NodeId;
use crate::config::{MicrotaskMode, RuntimeConfig};
use crate::error::Result;
use crate::scheduler::{
    LocalTasks, ManualMicrotasks, MicrotaskQueue, MicrotaskScheduler, SyncScheduler, TaskScheduler, TokioMicrotasks,
};
use crate::scope::Scope;

/// Handle to a reactive graph. Cloning is cheap and shares the graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

struct RuntimeInner {
    clock: Cell<u64>,
    tracking: TrackingContext,
    batch_lock: Cell<usize>,
    sync_scheduler: Rc<SyncScheduler>,
    deferred_scheduler: Rc<MicrotaskScheduler>,
    microtasks: Rc<ManualMicrotasks>,
    local_tasks: LocalTasks,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with an explicit configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let microtasks = Rc::new(ManualMicrotasks::new());
        let backend: Rc<dyn MicrotaskQueue> = match config.microtasks {
            MicrotaskMode::Manual => microtasks.clone(),
            MicrotaskMode::Tokio => Rc::new(TokioMicrotasks),
        };

        Self {
            inner: Rc::new(RuntimeInner {
                clock: Cell::new(0),
                tracking: TrackingContext::new(),
                batch_lock: Cell::new(0),
                sync_scheduler: Rc::new(SyncScheduler::new()),
                deferred_scheduler: Rc::new(MicrotaskScheduler::new(backend)),
                microtasks,
                local_tasks: LocalTasks::new(),
                config,
            }),
        }
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Clock and tracking
    // ------------------------------------------------------------------

    /// Current value of the staleness clock.
    pub fn clock(&self) -> u64 {
        self.inner.clock.get()
    }

    /// Advance the clock. Called whenever an atom's value changes.
    pub(crate) fn update_atom_clock(&self) {
        let clock = &self.inner.clock;
        clock.set(clock.get().wrapping_add(1));
    }

    /// Whether a pure evaluation is running. Atom writes fail while it is.
    pub fn is_tracked(&self) -> bool {
        self.inner.tracking.is_tracked()
    }

    pub(crate) fn tracking(&self) -> &TrackingContext {
        &self.inner.tracking
    }

    /// Run `f` as the tracked evaluation of `effect`, returning its result
    /// and the atoms it read.
    pub(crate) fn run_as_tracked<R>(&self, effect: NodeId, f: impl FnOnce() -> R) -> Result<(R, AtomSources)> {
        let run = self.inner.tracking.enter_tracked(effect)?;
        let value = f();
        Ok((value, run.finish()))
    }

    /// Run `f` with the tracked flag set, keeping any sources being
    /// collected by an enclosing tracked run.
    pub(crate) fn with_tracked_flag<R>(&self, f: impl FnOnce() -> R) -> R {
        let _flag = self.inner.tracking.set_tracked(true);
        f()
    }

    /// Run `f` untracked: reads are not recorded as dependencies and atom
    /// writes are allowed.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _flag = self.inner.tracking.set_tracked(false);
        f()
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Run `f` with notification delivery paused.
    ///
    /// Effects notified during `f` run once, after the outermost batch ends.
    /// The lock is released even if `f` panics.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _batch = BatchGuard::lock(&self.inner);
        f()
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.batch_lock.get() > 0
    }

    /// Run pending microtasks on the manual backend, which flushes deferred
    /// effects, and poll woken async actions. Repeats until neither makes
    /// progress. Returns the number of microtasks and polls.
    ///
    /// With [`MicrotaskMode::Tokio`] the tokio `LocalSet` drives both and
    /// this returns 0.
    pub fn run_microtasks(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.inner.microtasks.run() + self.inner.local_tasks.poll_woken();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Number of async actions that have not settled on the manual backend.
    pub fn pending_futures(&self) -> usize {
        self.inner.local_tasks.len()
    }

    /// Drive `future` to completion on this runtime's microtask backend.
    pub(crate) fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        match self.inner.config.microtasks {
            MicrotaskMode::Manual => self.inner.local_tasks.spawn(future),
            MicrotaskMode::Tokio => {
                tokio::task::spawn_local(future);
            }
        }
    }

    /// The synchronous scheduler.
    pub fn sync_scheduler(&self) -> Rc<dyn TaskScheduler> {
        self.inner.sync_scheduler.clone()
    }

    /// The microtask scheduler.
    pub fn deferred_scheduler(&self) -> Rc<dyn TaskScheduler> {
        self.inner.deferred_scheduler.clone()
    }

    pub(crate) fn scheduler(&self, sync: bool) -> Rc<dyn TaskScheduler> {
        if sync {
            self.sync_scheduler()
        } else {
            self.deferred_scheduler()
        }
    }

    // ------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------

    /// Create a writable atom compared with `PartialEq`.
    pub fn atom<T>(&self, value: T) -> WritableAtom<T>
    where
        T: PartialEq + 'static,
    {
        WritableAtom::new(self, value, AtomOptions::default())
    }

    /// Create a writable atom with explicit options.
    pub fn atom_with<T: 'static>(&self, value: T, options: AtomOptions<T>) -> WritableAtom<T> {
        WritableAtom::new(self, value, options)
    }

    /// Create a memoized derived atom.
    pub fn compute<T, F>(&self, compute: F) -> Atom<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        self.compute_with(compute, ComputeOptions::default())
    }

    /// Create a memoized derived atom with explicit options.
    pub fn compute_with<T, F>(&self, compute: F, options: ComputeOptions<T>) -> Atom<T>
    where
        T: Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        Atom::from_source(Rc::new(ComputedNode::new(self, Box::new(compute), options)))
    }

    /// Create a signal with default options (asynchronous delivery).
    pub fn signal<T: Clone + 'static>(&self) -> Signal<T> {
        Signal::new(SignalOptions::default())
    }

    /// Create a signal with explicit options.
    pub fn signal_with<T: Clone + 'static>(&self, options: SignalOptions<T>) -> Signal<T> {
        Signal::new(options)
    }

    /// Create an effect running `action` whenever `source` changes.
    pub fn effect<T, R, S, F>(&self, source: S, action: F) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Result<R> + 'static,
    {
        self.effect_with(source, action, EffectOptions::default())
    }

    /// Create an effect with explicit options.
    pub fn effect_with<T, R, S, F>(&self, source: S, mut action: F, options: EffectOptions) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Result<R> + 'static,
    {
        effect::create(
            self,
            source.into(),
            Box::new(move |value, ctx| ActionOutput::Ready(action(value, ctx))),
            options,
        )
    }

    /// Create an effect that always runs on the synchronous scheduler.
    pub fn sync_effect<T, R, S, F>(&self, source: S, action: F) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Result<R> + 'static,
    {
        self.effect_with(source, action, EffectOptions::default().sync(true))
    }

    /// Create an effect whose action returns a future.
    ///
    /// The future is driven by the runtime's microtask backend: polled from
    /// [`Runtime::run_microtasks`] in manual mode, spawned on the current
    /// `LocalSet` in tokio mode. Its output is routed to `on_result` or
    /// `on_error` when it settles.
    pub fn async_effect<T, R, S, F, Fut>(&self, source: S, mut action: F) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
    {
        effect::create(
            self,
            source.into(),
            Box::new(move |value, ctx| ActionOutput::Pending(action(value, ctx).boxed_local())),
            EffectOptions::default(),
        )
    }

    /// Create an empty scope.
    pub fn create_scope(&self) -> Scope {
        Scope::new(self)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("clock", &self.clock())
            .field("tracked", &self.is_tracked())
            .field("batch_lock", &self.inner.batch_lock.get())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Holds one level of the batch lock.
struct BatchGuard<'a> {
    inner: &'a RuntimeInner,
}

impl<'a> BatchGuard<'a> {
    fn lock(inner: &'a RuntimeInner) -> Self {
        let depth = inner.batch_lock.get();
        inner.batch_lock.set(depth + 1);
        if depth == 0 {
            tracing::trace!("batch opened");
            inner.sync_scheduler.pause();
            inner.deferred_scheduler.pause();
        }
        Self { inner }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let depth = self.inner.batch_lock.get();
        self.inner.batch_lock.set(depth - 1);
        if depth == 1 {
            tracing::trace!("batch closed, flushing");
            self.inner.sync_scheduler.resume();
            self.inner.deferred_scheduler.resume();
        }
    }
}
