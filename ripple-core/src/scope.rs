//! Scopes
//!
//! A [`Scope`] owns a list of teardowns and runs all of them on
//! [`Scope::destroy`]. Atoms, signals, effects and child scopes created
//! through a scope's constructors are registered automatically, so one
//! `destroy` call releases a whole group of reactive resources.
//!
//! Teardowns run in registration order. A failing teardown does not stop the
//! walk: every failure is collected into one [`ReactiveError::Aggregate`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::reactive::{
    Atom, AtomOptions, ComputeOptions, EffectContext, EffectOptions, EffectSource, EffectSubscription, Runtime,
    Signal, SignalOptions, WritableAtom,
};
use crate::scheduler::report_error;

/// A resource torn down by calling `destroy`.
pub trait Destroyable {
    fn destroy(&self) -> Result<()>;
}

/// A resource torn down by calling `unsubscribe`.
pub trait Unsubscribable {
    fn unsubscribe(&self) -> Result<()>;
}

/// One entry of a scope's teardown list.
pub enum Teardown {
    Destroy(Rc<dyn Destroyable>),
    Unsubscribe(Rc<dyn Unsubscribable>),
    Callback(Box<dyn FnOnce() -> Result<()>>),
}

impl Teardown {
    fn run(self) -> Result<()> {
        match self {
            Teardown::Destroy(resource) => resource.destroy(),
            Teardown::Unsubscribe(resource) => resource.unsubscribe(),
            Teardown::Callback(callback) => callback(),
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Teardown::Destroy(_) => "Destroy",
            Teardown::Unsubscribe(_) => "Unsubscribe",
            Teardown::Callback(_) => "Callback",
        };
        f.debug_tuple("Teardown").field(&kind).finish()
    }
}

impl<T: 'static> Destroyable for WritableAtom<T> {
    fn destroy(&self) -> Result<()> {
        WritableAtom::destroy(self);
        Ok(())
    }
}

impl<T: Clone + 'static> Destroyable for Signal<T> {
    fn destroy(&self) -> Result<()> {
        Signal::destroy(self);
        Ok(())
    }
}

impl<R: Clone + 'static> Destroyable for EffectSubscription<R> {
    fn destroy(&self) -> Result<()> {
        EffectSubscription::destroy(self);
        Ok(())
    }
}

impl Destroyable for Scope {
    fn destroy(&self) -> Result<()> {
        Scope::destroy(self)
    }
}

impl<T: 'static> From<WritableAtom<T>> for Teardown {
    fn from(atom: WritableAtom<T>) -> Self {
        Teardown::Destroy(Rc::new(atom))
    }
}

impl<T: Clone + 'static> From<Signal<T>> for Teardown {
    fn from(signal: Signal<T>) -> Self {
        Teardown::Destroy(Rc::new(signal))
    }
}

impl<R: Clone + 'static> From<EffectSubscription<R>> for Teardown {
    fn from(subscription: EffectSubscription<R>) -> Self {
        Teardown::Destroy(Rc::new(subscription))
    }
}

impl From<Scope> for Teardown {
    fn from(scope: Scope) -> Self {
        Teardown::Destroy(Rc::new(scope))
    }
}

struct ScopeInner {
    runtime: Runtime,
    teardowns: RefCell<Vec<Teardown>>,
    destroyed: Cell<bool>,
}

/// Container that destroys everything registered with it.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Runtime;
///
/// let rt = Runtime::new();
/// let scope = rt.create_scope();
///
/// let count = scope.atom(0);
/// let _log = scope.sync_effect(&count, |n: i32, _| {
///     println!("count = {n}");
///     Ok(())
/// });
///
/// scope.destroy().unwrap();
/// assert!(count.is_destroyed());
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                runtime: runtime.clone(),
                teardowns: RefCell::new(Vec::new()),
                destroyed: Cell::new(false),
            }),
        }
    }

    /// Register a teardown. On a destroyed scope it runs right away, and a
    /// failure goes to the global error reporter.
    pub fn add(&self, teardown: impl Into<Teardown>) {
        let teardown = teardown.into();
        if self.inner.destroyed.get() {
            if let Err(error) = teardown.run() {
                tracing::warn!(%error, "teardown on destroyed scope failed");
                report_error(&error);
            }
            return;
        }
        self.inner.teardowns.borrow_mut().push(teardown);
    }

    /// Register a callback to run on destroy.
    pub fn on_destroy(&self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.add(Teardown::Callback(Box::new(callback)));
    }

    /// Run every teardown once. Later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Aggregate`] with the failures, in registration
    /// order, if any teardown failed.
    pub fn destroy(&self) -> Result<()> {
        if self.inner.destroyed.replace(true) {
            return Ok(());
        }

        let teardowns = std::mem::take(&mut *self.inner.teardowns.borrow_mut());
        tracing::trace!(teardowns = teardowns.len(), "destroying scope");

        let mut errors = Vec::new();
        for teardown in teardowns {
            if let Err(error) = teardown.run() {
                tracing::warn!(%error, "scope teardown failed");
                errors.push(error);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReactiveError::Aggregate(errors))
        }
    }

    /// Whether [`Scope::destroy`] has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// The runtime the scope creates resources in.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Create an atom destroyed with the scope.
    pub fn atom<T: PartialEq + 'static>(&self, value: T) -> WritableAtom<T> {
        let atom = self.inner.runtime.atom(value);
        self.add(atom.clone());
        atom
    }

    /// Create an atom with custom options, destroyed with the scope.
    pub fn atom_with<T: 'static>(&self, value: T, options: AtomOptions<T>) -> WritableAtom<T> {
        let atom = self.inner.runtime.atom_with(value, options);
        self.add(atom.clone());
        atom
    }

    /// Computed nodes own no subscriptions, so nothing is registered.
    pub fn compute<T, F>(&self, compute: F) -> Atom<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        self.inner.runtime.compute(compute)
    }

    /// Like [`Scope::compute`], with a name or custom equality.
    pub fn compute_with<T, F>(&self, compute: F, options: ComputeOptions<T>) -> Atom<T>
    where
        T: Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        self.inner.runtime.compute_with(compute, options)
    }

    /// Create a signal destroyed with the scope.
    pub fn signal<T: Clone + 'static>(&self) -> Signal<T> {
        self.signal_with(SignalOptions::default())
    }

    /// Create a signal with custom options, destroyed with the scope.
    pub fn signal_with<T: Clone + 'static>(&self, options: SignalOptions<T>) -> Signal<T> {
        let signal = self.inner.runtime.signal_with(options);
        self.add(signal.clone());
        signal
    }

    /// Create an effect with default options. Destroying the scope destroys
    /// the effect, and the scope keeps it alive until then.
    pub fn effect<T, R, S, F>(&self, source: S, action: F) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Result<R> + 'static,
    {
        self.register(self.inner.runtime.effect(source, action))
    }

    /// Create an effect with explicit options, owned by the scope.
    pub fn effect_with<T, R, S, F>(&self, source: S, action: F, options: EffectOptions) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Result<R> + 'static,
    {
        self.register(self.inner.runtime.effect_with(source, action, options))
    }

    /// Create an effect on the synchronous scheduler, owned by the scope.
    pub fn sync_effect<T, R, S, F>(&self, source: S, action: F) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Result<R> + 'static,
    {
        self.register(self.inner.runtime.sync_effect(source, action))
    }

    /// Create an effect whose action returns a future, owned by the scope.
    ///
    /// See [`Runtime::async_effect`] for how the future is driven.
    pub fn async_effect<T, R, S, F, Fut>(&self, source: S, action: F) -> EffectSubscription<R>
    where
        T: Clone + 'static,
        R: Clone + 'static,
        S: Into<EffectSource<T>>,
        F: FnMut(T, &EffectContext) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
    {
        self.register(self.inner.runtime.async_effect(source, action))
    }

    /// Create a child scope destroyed together with this one.
    pub fn create_scope(&self) -> Scope {
        let child = Scope::new(&self.inner.runtime);
        self.add(child.clone());
        child
    }

    fn register<R: Clone + 'static>(&self, subscription: EffectSubscription<R>) -> EffectSubscription<R> {
        self.add(subscription.clone());
        subscription
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("teardowns", &self.inner.teardowns.borrow().len())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
