//! Effect Implementation
//!
//! An effect is a side-effecting consumer that runs an action whenever its
//! source changes.
//!
//! # Sources
//!
//! The source is resolved once, at construction, into an [`EffectSource`]:
//!
//! - an atom (writable view or computed): an *atom-effect*, which discovers
//!   the atoms it depends on by evaluating the source in a tracked run,
//! - a list of atoms: an atom-effect over all of them,
//! - a signal: a *signal-effect*, which runs once per event.
//!
//! # Scheduling
//!
//! Effects hand their runs to a scheduler. Atom-effects coalesce: any number
//! of notifications before the run executes result in a single run. Atom
//! effects default to the microtask scheduler, signal-effects follow the
//! signal's `sync` flag; [`EffectOptions::sync`] overrides both.
//!
//! # Outputs
//!
//! Every effect owns three signals:
//!
//! - `on_result` receives each value returned by the action (asynchronous by
//!   default),
//! - `on_error` receives action and source errors (synchronous),
//! - `on_destroy` fires once when the effect is destroyed (synchronous).
//!
//! # Cleanup
//!
//! [`EffectContext::cleanup`] registers a callback that runs right before
//! the next invocation of the action and when the effect is destroyed.

mod atom_effect;
mod signal_effect;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use smallvec::{smallvec, SmallVec};

use super::atom::{Atom, WritableAtom};
use super::runtime::Runtime;
use super::signal::{Signal, SignalOptions};
use super::subscriber::NodeId;
use crate::error::{ReactiveError, Result};
use crate::scheduler::{report_error, TaskScheduler};
use crate::scope::Scope;

use atom_effect::AtomEffect;
use signal_effect::SignalEffect;

/// Versions of the atoms behind a source, compared between runs.
pub(crate) type Versions = SmallVec<[u64; 4]>;

/// What an action produced.
pub enum ActionOutput<R> {
    /// A result available right away.
    Ready(Result<R>),

    /// A result that arrives when the future settles.
    Pending(LocalBoxFuture<'static, Result<R>>),
}

pub(crate) type Action<T, R> = Box<dyn FnMut(T, &EffectContext) -> ActionOutput<R>>;

/// Options for [`Runtime::effect_with`].
#[derive(Debug, Clone, Default)]
pub struct EffectOptions {
    sync: Option<bool>,
    name: Option<String>,
}

impl EffectOptions {
    /// Run on the synchronous (`true`) or microtask (`false`) scheduler.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Name the effect for logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A fixed set of atoms read together as one source.
pub struct AtomList<T> {
    read: Box<dyn Fn() -> Result<T>>,
    versions: Box<dyn Fn() -> Versions>,
    orphaned: Box<dyn Fn() -> bool>,
}

impl<T: Clone + 'static> AtomList<T> {
    fn single(atom: Atom<T>) -> Self {
        let versioned = atom.clone();
        let watched = atom.clone();
        Self {
            read: Box::new(move || atom.get()),
            versions: Box::new(move || -> Versions { smallvec![versioned.version()] }),
            orphaned: Box::new(move || watched.is_destroyed()),
        }
    }
}

impl<U: Clone + 'static> AtomList<Vec<U>> {
    fn many(atoms: Vec<Atom<U>>) -> Self {
        let atoms = Rc::new(atoms);
        let versioned = atoms.clone();
        let watched = atoms.clone();
        Self {
            read: Box::new(move || atoms.iter().map(Atom::get).collect::<Result<Vec<U>>>()),
            versions: Box::new(move || versioned.iter().map(Atom::version).collect::<Versions>()),
            orphaned: Box::new(move || !watched.is_empty() && watched.iter().all(Atom::is_destroyed)),
        }
    }
}

/// The closed set of things an effect can observe.
pub enum EffectSource<T> {
    /// An atom or computed node.
    Atom(Atom<T>),

    /// A signal.
    Signal(Signal<T>),

    /// A fixed list of atoms, observed as the list of their values.
    AtomList(AtomList<T>),
}

impl<T: Clone + 'static> From<Atom<T>> for EffectSource<T> {
    fn from(atom: Atom<T>) -> Self {
        Self::Atom(atom)
    }
}

impl<T: Clone + 'static> From<&Atom<T>> for EffectSource<T> {
    fn from(atom: &Atom<T>) -> Self {
        Self::Atom(atom.clone())
    }
}

impl<T: Clone + 'static> From<&WritableAtom<T>> for EffectSource<T> {
    fn from(atom: &WritableAtom<T>) -> Self {
        Self::Atom(atom.as_readonly())
    }
}

impl<T: Clone + 'static> From<Signal<T>> for EffectSource<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T: Clone + 'static> From<&Signal<T>> for EffectSource<T> {
    fn from(signal: &Signal<T>) -> Self {
        Self::Signal(signal.clone())
    }
}

impl<U: Clone + 'static> From<Vec<Atom<U>>> for EffectSource<Vec<U>> {
    fn from(atoms: Vec<Atom<U>>) -> Self {
        Self::AtomList(AtomList::many(atoms))
    }
}

impl<U: Clone + 'static> From<Vec<WritableAtom<U>>> for EffectSource<Vec<U>> {
    fn from(atoms: Vec<WritableAtom<U>>) -> Self {
        Self::AtomList(AtomList::many(atoms.iter().map(WritableAtom::as_readonly).collect()))
    }
}

/// Passed to every action invocation.
pub struct EffectContext {
    runtime: Runtime,
    scope: RefCell<Option<Scope>>,
}

impl EffectContext {
    fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            scope: RefCell::new(None),
        }
    }

    /// Register `f` to run before the next invocation or on destroy.
    pub fn cleanup(&self, f: impl FnOnce() + 'static) {
        self.scope().on_destroy(move || {
            f();
            Ok(())
        });
    }

    /// The scope torn down before the next invocation. Resources created in
    /// it live for exactly one run.
    pub fn scope(&self) -> Scope {
        self.scope
            .borrow_mut()
            .get_or_insert_with(|| Scope::new(&self.runtime))
            .clone()
    }

    /// The runtime the effect belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn take_scope(&self) -> Option<Scope> {
        self.scope.borrow_mut().take()
    }
}

/// State shared by both effect kinds.
pub(crate) struct EffectCore<R> {
    id: NodeId,
    name: Option<Rc<str>>,
    runtime: Runtime,
    scheduler: Rc<dyn TaskScheduler>,
    destroyed: Cell<bool>,
    on_result: Signal<R>,
    on_error: Signal<ReactiveError>,
    on_destroy: Signal<()>,
    context: EffectContext,
}

impl<R: Clone + 'static> EffectCore<R> {
    fn new(runtime: &Runtime, sync: bool, name: Option<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.map(Rc::from),
            runtime: runtime.clone(),
            scheduler: runtime.scheduler(sync),
            destroyed: Cell::new(false),
            on_result: Signal::new(SignalOptions::default()),
            on_error: Signal::new(SignalOptions::default().sync(true)),
            on_destroy: Signal::new(SignalOptions::default().sync(true)),
            context: EffectContext::new(runtime),
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Route an error to `on_error`, or to the global reporter when nobody
    /// listens.
    fn report(&self, error: ReactiveError) {
        tracing::debug!(effect = self.id.raw(), name = ?self.name, %error, "effect error");
        if self.on_error.subscriber_count() == 0 {
            report_error(&error);
        }
        self.on_error.emit(error);
    }

    fn discard_cleanup(&self) {
        if let Some(scope) = self.context.take_scope() {
            if let Err(error) = scope.destroy() {
                self.report(error);
            }
        }
    }

    /// Run the action once with `value`, untracked, and route its output.
    fn execute<T>(&self, action: &RefCell<Option<Action<T, R>>>, value: T) {
        let output = {
            let Ok(mut slot) = action.try_borrow_mut() else {
                tracing::warn!(effect = self.id.raw(), "effect action re-entered; run skipped");
                return;
            };
            let Some(action) = slot.as_mut() else {
                return;
            };
            self.discard_cleanup();
            self.runtime.untracked(|| action(value, &self.context))
        };
        self.route(output);
    }

    fn route(&self, output: ActionOutput<R>) {
        match output {
            ActionOutput::Ready(Ok(result)) => self.on_result.emit(result),
            ActionOutput::Ready(Err(error)) => self.report(error),
            ActionOutput::Pending(future) => {
                let on_result = self.on_result.clone();
                let on_error = self.on_error.clone();
                self.runtime.spawn_local(
                    async move {
                        match future.await {
                            Ok(result) => on_result.emit(result),
                            Err(error) => {
                                if on_error.subscriber_count() == 0 {
                                    report_error(&error);
                                }
                                on_error.emit(error);
                            }
                        }
                    }
                    .boxed_local(),
                );
            }
        }
    }

    /// Shared tail of `destroy`: cleanup, `on_destroy`, then the signals.
    fn teardown(&self) {
        tracing::debug!(effect = self.id.raw(), name = ?self.name, "effect destroyed");
        self.discard_cleanup();
        self.on_destroy.emit(());

        // Queued behind any delivery already waiting on the sync scheduler,
        // so observers of `on_destroy` still see the event.
        let signals = (self.on_result.clone(), self.on_error.clone(), self.on_destroy.clone());
        self.runtime.sync_scheduler().schedule(Box::new(move || {
            let (on_result, on_error, on_destroy) = signals;
            on_result.destroy();
            on_error.destroy();
            on_destroy.destroy();
            Ok(())
        }));
    }
}

/// Object-safe view of an effect used by [`EffectSubscription`].
pub(crate) trait EffectNode<R> {
    fn core(&self) -> &EffectCore<R>;

    fn destroy(&self);
}

/// Handle to a running effect.
///
/// The effect stays alive while this handle (or a [`Scope`] it was
/// registered with) exists. Dropping every handle lets it go silently;
/// [`EffectSubscription::destroy`] stops it and fires `on_destroy`.
pub struct EffectSubscription<R> {
    node: Rc<dyn EffectNode<R>>,
}

impl<R: Clone + 'static> EffectSubscription<R> {
    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.core().id
    }

    /// Values returned by the action.
    pub fn on_result(&self) -> &Signal<R> {
        &self.node.core().on_result
    }

    /// Errors from the action, the source or cleanups.
    pub fn on_error(&self) -> &Signal<ReactiveError> {
        &self.node.core().on_error
    }

    /// Fires once when the effect is destroyed.
    pub fn on_destroy(&self) -> &Signal<()> {
        &self.node.core().on_destroy
    }

    /// Whether the effect has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.node.core().is_destroyed()
    }

    /// Stop the effect. Idempotent; a pending run becomes a no-op.
    pub fn destroy(&self) {
        self.node.destroy();
    }
}

impl<R> Clone for EffectSubscription<R> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<R: Clone + 'static> fmt::Debug for EffectSubscription<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.node.core();
        f.debug_struct("EffectSubscription")
            .field("id", &core.id)
            .field("name", &core.name)
            .field("sync", &core.scheduler.is_sync())
            .field("destroyed", &core.is_destroyed())
            .finish()
    }
}

/// Build an effect for `source`, choosing the scheduler from the options,
/// the signal or the runtime configuration.
pub(crate) fn create<T, R>(
    runtime: &Runtime,
    source: EffectSource<T>,
    action: Action<T, R>,
    options: EffectOptions,
) -> EffectSubscription<R>
where
    T: Clone + 'static,
    R: Clone + 'static,
{
    let EffectOptions { sync, name } = options;
    let node: Rc<dyn EffectNode<R>> = match source {
        EffectSource::Signal(signal) => {
            let core = EffectCore::new(runtime, sync.unwrap_or(signal.is_sync()), name);
            SignalEffect::create(core, signal, action)
        }
        EffectSource::Atom(atom) => {
            let core = EffectCore::new(runtime, sync.unwrap_or(runtime.config().sync_effects), name);
            AtomEffect::create(core, AtomList::single(atom), action)
        }
        EffectSource::AtomList(list) => {
            let core = EffectCore::new(runtime, sync.unwrap_or(runtime.config().sync_effects), name);
            AtomEffect::create(core, list, action)
        }
    };
    EffectSubscription { node }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentered_action_keeps_its_cleanup() {
        let rt = Runtime::new();
        let core: EffectCore<()> = EffectCore::new(&rt, true, None);
        let cleaned = Rc::new(Cell::new(0));
        let counter = cleaned.clone();
        core.context.cleanup(move || counter.set(counter.get() + 1));

        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let action: RefCell<Option<Action<(), ()>>> = RefCell::new(Some(Box::new(move |_: (), _: &EffectContext| {
            runs_clone.set(runs_clone.get() + 1);
            ActionOutput::Ready(Ok(()))
        })));

        {
            let _running = action.borrow_mut();
            core.execute(&action, ());
        }
        assert_eq!(runs.get(), 0);
        assert_eq!(cleaned.get(), 0);

        core.execute(&action, ());
        assert_eq!(runs.get(), 1);
        assert_eq!(cleaned.get(), 1);
    }
}
