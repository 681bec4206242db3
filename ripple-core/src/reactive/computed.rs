//! Computed Implementation
//!
//! A computed node is a cached derived value. It is read through an
//! [`Atom`](super::Atom) handle returned by [`Runtime::compute`].
//!
//! # How Computed Nodes Work
//!
//! 1. Nothing runs until the first read.
//!
//! 2. A read recomputes when the node is stale:
//!    - the cache is unset,
//!    - the runtime clock moved since the last compute (some atom changed),
//!    - or a different effect is reading than the one that read last.
//!
//!    The last rule makes every effect re-run the function at least once,
//!    so each of them discovers the atoms behind the node.
//!
//! 3. The version only moves when the result changes. A recompute that
//!    yields an equal value keeps the old value and version, which is what
//!    lets effects skip their action.
//!
//! 4. Errors are cached. A node that failed, including one caught in a
//!    cycle, returns the same error on every read until a recompute
//!    succeeds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::atom::{next_version, AtomSource, EqualFn};
use super::runtime::Runtime;
use super::subscriber::NodeId;
use crate::error::{ReactiveError, Result};

/// Options for [`Runtime::compute_with`].
pub struct ComputeOptions<T> {
    name: Option<String>,
    equal: EqualFn<T>,
}

impl<T: PartialEq + 'static> Default for ComputeOptions<T> {
    fn default() -> Self {
        Self::with_equal(|a: &T, b: &T| a == b)
    }
}

impl<T: 'static> ComputeOptions<T> {
    /// Options with a custom equality and no `PartialEq` requirement.
    pub fn with_equal(equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            name: None,
            equal: Rc::new(equal),
        }
    }

    /// Name the node. Names show up in cycle errors and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the equality function.
    pub fn equal(mut self, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equal = Rc::new(equal);
        self
    }
}

/// Cache state of a computed node.
#[derive(Debug, Clone)]
pub(crate) enum ComputedState<T> {
    /// Never computed.
    Unset,

    /// The function is running. Reading now is a cycle.
    Computing,

    /// The last run failed.
    Errored(ReactiveError),

    /// The last run produced a value.
    Settled(T),
}

pub(crate) struct ComputedNode<T> {
    id: NodeId,
    name: Option<Rc<str>>,
    runtime: Runtime,
    compute: Box<dyn Fn() -> Result<T>>,
    state: RefCell<ComputedState<T>>,
    clock: Cell<u64>,
    observer: Cell<Option<NodeId>>,
    version: Cell<u64>,
    equal: EqualFn<T>,
}

impl<T: Clone + 'static> ComputedNode<T> {
    pub(crate) fn new(runtime: &Runtime, compute: Box<dyn Fn() -> Result<T>>, options: ComputeOptions<T>) -> Self {
        Self {
            id: NodeId::new(),
            name: options.name.map(Rc::from),
            runtime: runtime.clone(),
            compute,
            state: RefCell::new(ComputedState::Unset),
            clock: Cell::new(0),
            observer: Cell::new(None),
            version: Cell::new(0),
            equal: options.equal,
        }
    }

    fn is_stale(&self, active_effect: Option<NodeId>) -> bool {
        matches!(*self.state.borrow(), ComputedState::Unset)
            || self.clock.get() != self.runtime.clock()
            || self.observer.get() != active_effect
    }

    fn recompute(&self) {
        let old = self.state.replace(ComputedState::Computing);
        let guard = UnwindGuard::arm(&self.state);
        let result = self.runtime.with_tracked_flag(|| (self.compute)());
        guard.disarm();
        self.clock.set(self.runtime.clock());

        let next = match (old, result) {
            (ComputedState::Settled(prev), Ok(value)) if (self.equal)(&prev, &value) => ComputedState::Settled(prev),
            (_, Ok(value)) => {
                self.bump();
                ComputedState::Settled(value)
            }
            (_, Err(error)) => {
                if error.is_cycle() {
                    tracing::debug!(computed = self.id.raw(), name = ?self.name, "cycle detected");
                }
                self.bump();
                ComputedState::Errored(error)
            }
        };
        *self.state.borrow_mut() = next;
    }

    fn bump(&self) {
        self.version.set(next_version(self.version.get()));
    }

    fn cycle_error(&self) -> ReactiveError {
        ReactiveError::Cycle {
            name: self.name.clone(),
        }
    }
}

/// Resets a node to `Unset` when its function unwinds, so a panic is not
/// mistaken for a cycle on later reads.
struct UnwindGuard<'a, T> {
    state: &'a RefCell<ComputedState<T>>,
    armed: bool,
}

impl<'a, T> UnwindGuard<'a, T> {
    fn arm(state: &'a RefCell<ComputedState<T>>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for UnwindGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.state.try_borrow_mut() {
            *state = ComputedState::Unset;
        }
    }
}

impl<T: Clone + 'static> AtomSource<T> for ComputedNode<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn read(&self) -> Result<T> {
        if matches!(*self.state.borrow(), ComputedState::Computing) {
            return Err(self.cycle_error());
        }

        let active_effect = self.runtime.tracking().active_effect();
        let stale = self.is_stale(active_effect);
        self.observer.set(active_effect);
        if stale {
            self.recompute();
        }

        match &*self.state.borrow() {
            ComputedState::Settled(value) => Ok(value.clone()),
            ComputedState::Errored(error) => Err(error.clone()),
            ComputedState::Unset | ComputedState::Computing => Err(self.cycle_error()),
        }
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn is_destroyed(&self) -> bool {
        false
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
