//! Signal Implementation
//!
//! A signal is a stateless event emitter. Unlike an atom it holds no value:
//! each [`Signal::emit`] is pushed to the current consumers and then
//! forgotten.
//!
//! # How Signals Work
//!
//! 1. Consumers (usually effects) subscribe with a weak reference.
//!
//! 2. `emit` hands a clone of the event to every live consumer, pruning the
//!    ones that were dropped.
//!
//! 3. Lifecycle hooks report subscription changes, which lets derived
//!    utilities attach to their upstream only while someone listens.
//!
//! 4. Destroying a signal destroys its consumers: without the signal they
//!    can never fire again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::subscriber::{ConsumerSet, NodeId, SignalConsumer};

/// Options for [`Runtime::signal_with`](super::Runtime::signal_with).
pub struct SignalOptions<T> {
    name: Option<String>,
    sync: bool,
    on_event: Option<Box<dyn Fn(&T)>>,
    on_subscribe: Option<Box<dyn Fn()>>,
    on_unsubscribe: Option<Box<dyn Fn(bool)>>,
    on_destroy: Option<Box<dyn FnOnce()>>,
}

impl<T> Default for SignalOptions<T> {
    fn default() -> Self {
        Self {
            name: None,
            sync: false,
            on_event: None,
            on_subscribe: None,
            on_unsubscribe: None,
            on_destroy: None,
        }
    }
}

impl<T> SignalOptions<T> {
    /// Name the signal.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Deliver to effects synchronously by default.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Called with every emitted event before consumers are notified.
    pub fn on_event(mut self, f: impl Fn(&T) + 'static) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    /// Called whenever a new consumer subscribes.
    pub fn on_subscribe(mut self, f: impl Fn() + 'static) -> Self {
        self.on_subscribe = Some(Box::new(f));
        self
    }

    /// Called when consumers leave, with whether none are left.
    pub fn on_unsubscribe(mut self, f: impl Fn(bool) + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(f));
        self
    }

    /// Called once when the signal is destroyed.
    pub fn on_destroy(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_destroy = Some(Box::new(f));
        self
    }
}

struct SignalNode<T> {
    id: NodeId,
    name: Option<Rc<str>>,
    sync: bool,
    consumers: ConsumerSet<dyn SignalConsumer<T>>,
    destroyed: Cell<bool>,
    on_event: Option<Box<dyn Fn(&T)>>,
    on_subscribe: Option<Box<dyn Fn()>>,
    on_unsubscribe: Option<Box<dyn Fn(bool)>>,
    on_destroy: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl<T> SignalNode<T> {
    fn unsubscribed(&self) {
        if let Some(on_unsubscribe) = &self.on_unsubscribe {
            on_unsubscribe(self.consumers.is_empty());
        }
    }
}

/// A stateless event emitter. Cloning the handle shares the signal.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Runtime, SignalOptions};
///
/// let rt = Runtime::new();
/// let clicks = rt.signal_with(SignalOptions::default().sync(true));
///
/// let sub = rt.effect(&clicks, |n: u32, _| {
///     println!("clicked {n} times");
///     Ok(())
/// });
///
/// clicks.emit(1);
/// sub.destroy();
/// ```
pub struct Signal<T> {
    node: Rc<SignalNode<T>>,
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal.
    pub fn new(options: SignalOptions<T>) -> Self {
        let SignalOptions {
            name,
            sync,
            on_event,
            on_subscribe,
            on_unsubscribe,
            on_destroy,
        } = options;

        Self {
            node: Rc::new(SignalNode {
                id: NodeId::new(),
                name: name.map(Rc::from),
                sync,
                consumers: ConsumerSet::new(),
                destroyed: Cell::new(false),
                on_event,
                on_subscribe,
                on_unsubscribe,
                on_destroy: RefCell::new(on_destroy),
            }),
        }
    }

    /// Push `value` to every live consumer. Does nothing once destroyed.
    pub fn emit(&self, value: T) {
        let node = &self.node;
        if node.destroyed.get() {
            return;
        }
        if let Some(on_event) = &node.on_event {
            on_event(&value);
        }

        let (live, pruned) = node.consumers.live();
        for (id, consumer) in live {
            if node.destroyed.get() {
                break;
            }
            if node.consumers.contains(id) {
                consumer.notify(value.clone());
            }
        }

        if pruned > 0 {
            node.unsubscribed();
        }
    }

    /// Add a consumer. The signal only keeps a weak reference.
    pub fn subscribe(&self, consumer: Weak<dyn SignalConsumer<T>>) {
        let node = &self.node;
        if node.destroyed.get() {
            return;
        }
        let Some(strong) = consumer.upgrade() else {
            return;
        };
        if node.consumers.insert(strong.consumer_id(), consumer) {
            if let Some(on_subscribe) = &node.on_subscribe {
                on_subscribe();
            }
        }
    }

    /// Remove a consumer.
    pub fn unsubscribe(&self, id: NodeId) {
        if self.node.consumers.remove(id) {
            self.node.unsubscribed();
        }
    }

    /// Destroy the signal and every consumer. Idempotent.
    pub fn destroy(&self) {
        let node = &self.node;
        if node.destroyed.replace(true) {
            return;
        }
        tracing::debug!(signal = node.id.raw(), name = ?node.name, "signal destroyed");

        for consumer in node.consumers.take_live() {
            consumer.destroy();
        }

        let on_destroy = node.on_destroy.borrow_mut().take();
        if let Some(on_destroy) = on_destroy {
            on_destroy();
        }
    }
}

impl<T> Signal<T> {
    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// The signal's name, if any.
    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }

    /// Whether effects on this signal run synchronously by default.
    pub fn is_sync(&self) -> bool {
        self.node.sync
    }

    /// Whether the signal has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.node.destroyed.get()
    }

    /// Number of subscribed consumers, including ones not pruned yet.
    pub fn subscriber_count(&self) -> usize {
        self.node.consumers.len()
    }

    /// Whether both handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.node.id)
            .field("name", &self.node.name)
            .field("sync", &self.node.sync)
            .field("subscriber_count", &self.subscriber_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        id: NodeId,
        seen: RefCell<Vec<i32>>,
        destroyed: Cell<bool>,
    }

    impl Recorder {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: NodeId::new(),
                seen: RefCell::new(Vec::new()),
                destroyed: Cell::new(false),
            })
        }
    }

    impl SignalConsumer<i32> for Recorder {
        fn consumer_id(&self) -> NodeId {
            self.id
        }

        fn notify(&self, value: i32) {
            self.seen.borrow_mut().push(value);
        }

        fn destroy(&self) {
            self.destroyed.set(true);
        }
    }

    fn weak(recorder: &Rc<Recorder>) -> Weak<dyn SignalConsumer<i32>> {
        let weak: Weak<Recorder> = Rc::downgrade(recorder);
        weak
    }

    #[test]
    fn emit_reaches_subscribers() {
        let signal = Signal::new(SignalOptions::default());
        let a = Recorder::new();
        let b = Recorder::new();
        signal.subscribe(weak(&a));
        signal.subscribe(weak(&b));

        signal.emit(1);
        signal.emit(2);

        assert_eq!(*a.seen.borrow(), vec![1, 2]);
        assert_eq!(*b.seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let signal = Signal::new(SignalOptions::default());
        let a = Recorder::new();
        signal.subscribe(weak(&a));

        signal.emit(1);
        signal.unsubscribe(a.id);
        signal.emit(2);

        assert_eq!(*a.seen.borrow(), vec![1]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn lifecycle_hooks_fire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3, l4) = (log.clone(), log.clone(), log.clone(), log.clone());
        let signal = Signal::new(
            SignalOptions::default()
                .on_event(move |v: &i32| l1.borrow_mut().push(format!("event {v}")))
                .on_subscribe(move || l2.borrow_mut().push("subscribe".to_string()))
                .on_unsubscribe(move |empty| l3.borrow_mut().push(format!("unsubscribe {empty}")))
                .on_destroy(move || l4.borrow_mut().push("destroy".to_string())),
        );

        let a = Recorder::new();
        let b = Recorder::new();
        signal.subscribe(weak(&a));
        signal.subscribe(weak(&b));
        signal.emit(7);
        signal.unsubscribe(a.id);
        signal.destroy();
        signal.destroy();

        assert_eq!(
            *log.borrow(),
            vec![
                "subscribe",
                "subscribe",
                "event 7",
                "unsubscribe false",
                "destroy",
            ]
        );
    }

    #[test]
    fn dropped_consumers_are_pruned_on_emit() {
        let empties = Rc::new(RefCell::new(Vec::new()));
        let empties_clone = empties.clone();
        let signal = Signal::new(SignalOptions::default().on_unsubscribe(move |empty| empties_clone.borrow_mut().push(empty)));

        let a = Recorder::new();
        signal.subscribe(weak(&a));
        drop(a);

        signal.emit(1);
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(*empties.borrow(), vec![true]);
    }

    #[test]
    fn destroy_destroys_consumers_and_silences_the_signal() {
        let signal = Signal::new(SignalOptions::default().name("ticks"));
        let a = Recorder::new();
        signal.subscribe(weak(&a));

        signal.destroy();
        assert!(a.destroyed.get());
        assert!(signal.is_destroyed());

        signal.emit(1);
        signal.subscribe(weak(&a));
        assert!(a.seen.borrow().is_empty());
        assert_eq!(signal.subscriber_count(), 0);
    }
}
