//! Subscriber types for the reactive system.
//!
//! Producers (atoms and signals) keep their consumers in a [`ConsumerSet`]:
//! an insertion-ordered map of weak references keyed by [`NodeId`]. A
//! consumer that is dropped without unsubscribing simply stops upgrading and
//! gets pruned on the next delivery.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

/// Unique identifier for a node in a reactive graph.
///
/// Atoms, computed nodes, signals and effects all get one when created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer of atom changes.
pub trait AtomConsumer {
    /// Identity used for subscription bookkeeping.
    fn consumer_id(&self) -> NodeId;

    /// One of the consumer's atoms changed.
    fn notify(&self);

    /// One of the consumer's atoms was destroyed.
    ///
    /// Unlike a change, this may leave the consumer with fewer dependencies.
    fn notify_destroy(&self, source: NodeId);
}

/// A consumer of signal events.
pub trait SignalConsumer<T> {
    /// Identity used for subscription bookkeeping.
    fn consumer_id(&self) -> NodeId;

    /// The signal emitted `value`.
    fn notify(&self, value: T);

    /// The signal was destroyed. Consumers are expected to tear themselves
    /// down.
    fn destroy(&self);
}

/// Weak, ordered set of consumers.
pub(crate) struct ConsumerSet<C: ?Sized> {
    entries: RefCell<IndexMap<NodeId, Weak<C>>>,
}

impl<C: ?Sized> ConsumerSet<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
        }
    }

    /// Returns `true` when the consumer was not present yet.
    pub(crate) fn insert(&self, id: NodeId, consumer: Weak<C>) -> bool {
        self.entries.borrow_mut().insert(id, consumer).is_none()
    }

    /// Returns `true` when the consumer was present.
    pub(crate) fn remove(&self, id: NodeId) -> bool {
        self.entries.borrow_mut().shift_remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drop dead entries and return strong handles to the live ones, along
    /// with the number of entries pruned.
    ///
    /// The caller delivers to the returned snapshot with no borrow held, so
    /// consumers may subscribe or unsubscribe while being notified.
    pub(crate) fn live(&self) -> (Vec<(NodeId, Rc<C>)>, usize) {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        let mut live = Vec::with_capacity(before);
        entries.retain(|id, weak| match weak.upgrade() {
            Some(consumer) => {
                live.push((*id, consumer));
                true
            }
            None => false,
        });
        let pruned = before - entries.len();
        (live, pruned)
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Empty the set, returning the consumers that were still alive.
    pub(crate) fn take_live(&self) -> Vec<Rc<C>> {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        entries.into_values().filter_map(|weak| weak.upgrade()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        let id3 = NodeId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
        assert!(id1.raw() < id2.raw());
    }

    #[test]
    fn live_prunes_dropped_consumers() {
        let set: ConsumerSet<u32> = ConsumerSet::new();
        let kept = Rc::new(1);
        let dropped = Rc::new(2);

        let kept_id = NodeId::new();
        let dropped_id = NodeId::new();
        assert!(set.insert(kept_id, Rc::downgrade(&kept)));
        assert!(set.insert(dropped_id, Rc::downgrade(&dropped)));
        assert!(!set.insert(kept_id, Rc::downgrade(&kept)));
        drop(dropped);

        let (live, pruned) = set.live();
        assert_eq!(pruned, 1);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, kept_id);
        assert_eq!(set.len(), 1);
        assert!(!set.contains(dropped_id));
    }

    #[test]
    fn take_live_empties_the_set() {
        let set: ConsumerSet<u32> = ConsumerSet::new();
        let a = Rc::new(1);
        set.insert(NodeId::new(), Rc::downgrade(&a));

        let taken = set.take_live();
        assert_eq!(taken.len(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn remove_preserves_order_of_the_rest() {
        let set: ConsumerSet<u32> = ConsumerSet::new();
        let values: Vec<_> = (0..3).map(Rc::new).collect();
        let ids: Vec<_> = values
            .iter()
            .map(|value| {
                let id = NodeId::new();
                set.insert(id, Rc::downgrade(value));
                id
            })
            .collect();

        assert!(set.remove(ids[1]));
        assert!(!set.remove(ids[1]));

        let (live, _) = set.live();
        let order: Vec<u32> = live.iter().map(|(_, v)| **v).collect();
        assert_eq!(order, vec![0, 2]);
    }
}
