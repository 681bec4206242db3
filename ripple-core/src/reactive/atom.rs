//! Atom Implementation
//!
//! An atom is a mutable value cell. It is the only kind of node whose value
//! can be written, and the only kind of node an effect subscribes to: a
//! computed node is seen through the atoms it reads.
//!
//! # How Atoms Work
//!
//! 1. Reading an atom inside an effect's tracked run records it as one of
//!    the effect's dependencies.
//!
//! 2. Writing compares the new value with the current one. Only an unequal
//!    value is stored; it bumps the version, advances the runtime clock and
//!    notifies the subscribed effects.
//!
//! 3. Writing while a pure evaluation runs fails with
//!    [`ReactiveError::TrackedMutation`].
//!
//! 4. Destroying an atom tells each effect that the dependency is gone, then
//!    stops notifying for good. The last value stays readable.

use std::cell::{Cell, OnceCell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::Runtime;
use super::signal::{Signal, SignalOptions};
use super::subscriber::{AtomConsumer, ConsumerSet, NodeId};
use crate::error::{ReactiveError, Result};

/// Largest version before the counter wraps back to zero.
pub const MAX_SAFE_VERSION: u64 = (1 << 53) - 1;

/// Equality used to decide whether a write is a change.
pub type EqualFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

pub(crate) fn next_version(version: u64) -> u64 {
    if version >= MAX_SAFE_VERSION {
        0
    } else {
        version + 1
    }
}

/// Options for [`Runtime::atom_with`].
pub struct AtomOptions<T> {
    name: Option<String>,
    equal: EqualFn<T>,
    on_destroy: Option<Box<dyn FnOnce()>>,
}

impl<T: PartialEq + 'static> Default for AtomOptions<T> {
    fn default() -> Self {
        Self::with_equal(|a: &T, b: &T| a == b)
    }
}

impl<T: 'static> AtomOptions<T> {
    /// Options with a custom equality and no `PartialEq` requirement.
    pub fn with_equal(equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            name: None,
            equal: Rc::new(equal),
            on_destroy: None,
        }
    }

    /// Name the atom. Names show up in errors and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the equality function.
    pub fn equal(mut self, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equal = Rc::new(equal);
        self
    }

    /// Callback run once when the atom is destroyed.
    pub fn on_destroy(mut self, on_destroy: impl FnOnce() + 'static) -> Self {
        self.on_destroy = Some(Box::new(on_destroy));
        self
    }
}

/// Type-erased view of an atom used for dependency bookkeeping.
pub(crate) trait AtomNode {
    fn node_id(&self) -> NodeId;

    fn subscribe(&self, consumer: Weak<dyn AtomConsumer>);

    fn unsubscribe(&self, id: NodeId);
}

/// Anything an [`Atom`] can read from: a cell or a computed node.
pub(crate) trait AtomSource<T> {
    fn node_id(&self) -> NodeId;

    fn name(&self) -> Option<&str>;

    fn read(&self) -> Result<T>;

    fn version(&self) -> u64;

    fn is_destroyed(&self) -> bool;
}

pub(crate) struct AtomCell<T> {
    id: NodeId,
    name: Option<Rc<str>>,
    runtime: Runtime,
    value: RefCell<T>,
    version: Cell<u64>,
    equal: EqualFn<T>,
    consumers: ConsumerSet<dyn AtomConsumer>,
    destroyed: Cell<bool>,
    on_destroyed: OnceCell<Signal<()>>,
    on_destroy: RefCell<Option<Box<dyn FnOnce()>>>,
    weak_self: Weak<AtomCell<T>>,
}

impl<T: 'static> AtomCell<T> {
    fn track(&self) {
        let tracking = self.runtime.tracking();
        if !tracking.is_tracked() || self.destroyed.get() {
            return;
        }
        if let Some(me) = self.weak_self.upgrade() {
            tracking.record(me);
        }
    }

    fn check_writable(&self) -> Result<bool> {
        if self.destroyed.get() {
            return Ok(false);
        }
        if self.runtime.is_tracked() {
            return Err(ReactiveError::TrackedMutation {
                name: self.name.clone(),
            });
        }
        Ok(true)
    }

    fn set(&self, value: T) -> Result<()> {
        if !self.check_writable()? {
            return Ok(());
        }

        let changed = !(self.equal)(&*self.value.borrow(), &value);
        if !changed {
            return Ok(());
        }

        *self.value.borrow_mut() = value;
        self.commit();
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        if !self.check_writable()? {
            return Ok(());
        }

        f(&mut *self.value.borrow_mut());
        self.commit();
        Ok(())
    }

    fn commit(&self) {
        self.version.set(next_version(self.version.get()));
        self.runtime.update_atom_clock();

        let (live, pruned) = self.consumers.live();
        tracing::trace!(atom = self.id.raw(), consumers = live.len(), pruned, "atom changed");

        for (id, consumer) in live {
            if self.destroyed.get() {
                break;
            }
            // Skip consumers that unsubscribed while earlier ones ran.
            if self.consumers.contains(id) {
                consumer.notify();
            }
        }
    }

    fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        tracing::debug!(atom = self.id.raw(), name = ?self.name, "atom destroyed");

        let (live, _) = self.consumers.live();
        for (_, consumer) in live {
            consumer.notify_destroy(self.id);
        }
        self.consumers.clear();

        if let Some(signal) = self.on_destroyed.get() {
            signal.emit(());
        }
        let on_destroy = self.on_destroy.borrow_mut().take();
        if let Some(on_destroy) = on_destroy {
            on_destroy();
        }
    }
}

impl<T: 'static> AtomNode for AtomCell<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn subscribe(&self, consumer: Weak<dyn AtomConsumer>) {
        if self.destroyed.get() {
            return;
        }
        if let Some(strong) = consumer.upgrade() {
            self.consumers.insert(strong.consumer_id(), consumer);
        }
    }

    fn unsubscribe(&self, id: NodeId) {
        self.consumers.remove(id);
    }
}

impl<T: Clone + 'static> AtomSource<T> for AtomCell<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn read(&self) -> Result<T> {
        self.track();
        Ok(self.value.borrow().clone())
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

/// A writable atom. Cloning the handle shares the cell.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.atom(0);
///
/// count.set(5).unwrap();
/// count.update(|n| n + 1).unwrap();
/// assert_eq!(count.get(), 6);
/// ```
pub struct WritableAtom<T> {
    cell: Rc<AtomCell<T>>,
}

impl<T: 'static> WritableAtom<T> {
    pub(crate) fn new(runtime: &Runtime, value: T, options: AtomOptions<T>) -> Self {
        let AtomOptions {
            name,
            equal,
            on_destroy,
        } = options;

        let cell = Rc::new_cyclic(|weak_self| AtomCell {
            id: NodeId::new(),
            name: name.map(Rc::from),
            runtime: runtime.clone(),
            value: RefCell::new(value),
            version: Cell::new(0),
            equal,
            consumers: ConsumerSet::new(),
            destroyed: Cell::new(false),
            on_destroyed: OnceCell::new(),
            on_destroy: RefCell::new(on_destroy),
            weak_self: weak_self.clone(),
        });
        Self { cell }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    /// The atom's name, if any.
    pub fn name(&self) -> Option<&str> {
        self.cell.name.as_deref()
    }

    /// Current version. Advances on every accepted change.
    pub fn version(&self) -> u64 {
        self.cell.version.get()
    }

    /// Read the value by reference. Tracks like [`WritableAtom::get`].
    ///
    /// The atom must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.track();
        f(&*self.cell.value.borrow())
    }

    /// Borrow the value without tracking.
    pub fn borrow_untracked(&self) -> Ref<'_, T> {
        self.cell.value.borrow()
    }

    /// Store `value` if it differs from the current one.
    ///
    /// Does nothing once the atom is destroyed. Fails inside a tracked
    /// evaluation.
    pub fn set(&self, value: T) -> Result<()> {
        self.cell.set(value)
    }

    /// Store `f(current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = {
            let current = self.cell.value.borrow();
            f(&*current)
        };
        self.cell.set(next)
    }

    /// Modify the value in place and notify unconditionally.
    pub fn mutate(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        self.cell.mutate(f)
    }

    /// Whether the atom has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.cell.destroyed.get()
    }

    /// Destroy the atom. Idempotent.
    pub fn destroy(&self) {
        self.cell.destroy();
    }

    /// Signal emitted once when the atom is destroyed.
    pub fn on_destroyed(&self) -> Signal<()> {
        self.cell
            .on_destroyed
            .get_or_init(|| Signal::new(SignalOptions::default().sync(true)))
            .clone()
    }

    /// Number of effects subscribed.
    pub fn consumer_count(&self) -> usize {
        self.cell.consumers.len()
    }
}

impl<T: Clone + 'static> WritableAtom<T> {
    /// Read the value. Inside an effect's tracked run this records the atom
    /// as a dependency.
    pub fn get(&self) -> T {
        self.cell.track();
        self.cell.value.borrow().clone()
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.cell.value.borrow().clone()
    }

    /// A read-only view of this atom. Repeated calls return views of the
    /// same node.
    pub fn as_readonly(&self) -> Atom<T> {
        Atom::from_source(self.cell.clone())
    }
}

impl<T> Clone for WritableAtom<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for WritableAtom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableAtom")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("value", &self.cell.value.try_borrow().ok())
            .field("version", &self.cell.version.get())
            .field("destroyed", &self.cell.destroyed.get())
            .finish()
    }
}

/// A read-only atom: either a view of a [`WritableAtom`] or a computed
/// node.
pub struct Atom<T> {
    source: Rc<dyn AtomSource<T>>,
}

impl<T: Clone + 'static> Atom<T> {
    pub(crate) fn from_source(source: Rc<dyn AtomSource<T>>) -> Self {
        Self { source }
    }

    /// Read the value.
    ///
    /// Reading a view of a writable atom never fails. Reading a computed
    /// node returns its cycle or function error, if any.
    pub fn get(&self) -> Result<T> {
        self.source.read()
    }

    /// Current version. For a computed node it only advances when the
    /// computed value actually changes.
    pub fn version(&self) -> u64 {
        self.source.version()
    }

    /// Get the underlying node's ID.
    pub fn id(&self) -> NodeId {
        self.source.node_id()
    }

    /// The node's name, if any.
    pub fn name(&self) -> Option<&str> {
        self.source.name()
    }

    /// Whether the underlying writable atom was destroyed. Always `false`
    /// for computed nodes.
    pub fn is_destroyed(&self) -> bool {
        self.source.is_destroyed()
    }

    /// Whether both handles read the same node.
    pub fn ptr_eq(&self, other: &Atom<T>) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.source) as *const (),
            Rc::as_ptr(&other.source) as *const (),
        )
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
        }
    }
}

impl<T: Clone + 'static> From<&WritableAtom<T>> for Atom<T> {
    fn from(atom: &WritableAtom<T>) -> Self {
        atom.as_readonly()
    }
}

impl<T: Clone + 'static> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        key: u32,
        val: &'static str,
    }

    #[test]
    fn atom_get_and_set() {
        let rt = Runtime::new();
        let atom = rt.atom(0);
        assert_eq!(atom.get(), 0);

        atom.set(42).unwrap();
        assert_eq!(atom.get(), 42);
        assert_eq!(atom.version(), 1);
    }

    #[test]
    fn equal_values_do_not_bump_version_or_clock() {
        let rt = Runtime::new();
        let atom = rt.atom(7);

        atom.set(7).unwrap();
        assert_eq!(atom.version(), 0);
        assert_eq!(rt.clock(), 0);

        atom.set(8).unwrap();
        assert_eq!(atom.version(), 1);
        assert_eq!(rt.clock(), 1);
    }

    #[test]
    fn custom_equality_keeps_the_old_value() {
        let rt = Runtime::new();
        let atom = rt.atom_with(
            Entry { key: 1, val: "a" },
            AtomOptions::with_equal(|a: &Entry, b: &Entry| a.key == b.key),
        );

        atom.set(Entry { key: 1, val: "b" }).unwrap();
        assert_eq!(atom.get().val, "a");
        assert_eq!(atom.version(), 0);

        atom.set(Entry { key: 2, val: "c" }).unwrap();
        assert_eq!(atom.get(), Entry { key: 2, val: "c" });
        assert_eq!(atom.version(), 1);
    }

    #[test]
    fn update_applies_function() {
        let rt = Runtime::new();
        let atom = rt.atom(10);
        atom.update(|v| v + 5).unwrap();
        assert_eq!(atom.get(), 15);
    }

    #[test]
    fn mutate_bypasses_equality() {
        let rt = Runtime::new();
        let atom = rt.atom_with(vec![1, 2], AtomOptions::with_equal(|_: &Vec<i32>, _: &Vec<i32>| true));

        atom.mutate(|v| v.push(3)).unwrap();
        assert_eq!(atom.get(), vec![1, 2, 3]);
        assert_eq!(atom.version(), 1);
        assert_eq!(rt.clock(), 1);
    }

    #[test]
    fn writes_fail_in_tracked_context() {
        let rt = Runtime::new();
        let atom = rt.atom(1);

        let result = rt.with_tracked_flag(|| atom.set(2));
        assert!(matches!(result, Err(ReactiveError::TrackedMutation { .. })));

        let result = rt.with_tracked_flag(|| atom.mutate(|v| *v = 3));
        assert!(result.is_err());
        assert_eq!(atom.get(), 1);
    }

    #[test]
    fn destroyed_atom_ignores_writes_and_keeps_last_value() {
        let rt = Runtime::new();
        let destroyed = Rc::new(Cell::new(0));
        let destroyed_clone = destroyed.clone();
        let atom = rt.atom_with(
            1,
            AtomOptions::default()
                .name("counter")
                .on_destroy(move || destroyed_clone.set(destroyed_clone.get() + 1)),
        );

        atom.destroy();
        atom.destroy();
        assert!(atom.is_destroyed());
        assert_eq!(destroyed.get(), 1);

        atom.set(2).unwrap();
        assert_eq!(atom.get(), 1);
        assert_eq!(atom.version(), 0);
    }

    #[test]
    fn readonly_views_share_the_node() {
        let rt = Runtime::new();
        let atom = rt.atom_with(String::from("x"), AtomOptions::default().name("label"));
        let view = atom.as_readonly();

        assert!(view.ptr_eq(&atom.as_readonly()));
        assert_eq!(view.name(), Some("label"));
        assert_eq!(view.id(), atom.id());

        atom.set("y".to_string()).unwrap();
        assert_eq!(view.get().unwrap(), "y");
        assert_eq!(view.version(), 1);
    }

    #[test]
    fn version_wraps_at_safe_bound() {
        assert_eq!(next_version(0), 1);
        assert_eq!(next_version(MAX_SAFE_VERSION - 1), MAX_SAFE_VERSION);
        assert_eq!(next_version(MAX_SAFE_VERSION), 0);
    }
}
