//! Effects driven by signals.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{Action, EffectCore, EffectNode};
use crate::reactive::signal::Signal;
use crate::reactive::subscriber::{NodeId, SignalConsumer};

pub(super) struct SignalEffect<T, R> {
    core: EffectCore<R>,
    signal: Signal<T>,
    action: RefCell<Option<Action<T, R>>>,
    weak_self: Weak<SignalEffect<T, R>>,
}

impl<T: Clone + 'static, R: Clone + 'static> SignalEffect<T, R> {
    /// Build the effect and subscribe it. An effect on a destroyed signal
    /// comes back already destroyed.
    pub(super) fn create(core: EffectCore<R>, signal: Signal<T>, action: Action<T, R>) -> Rc<Self> {
        let effect = Rc::new_cyclic(|weak_self| Self {
            core,
            signal,
            action: RefCell::new(Some(action)),
            weak_self: weak_self.clone(),
        });

        if effect.signal.is_destroyed() {
            EffectNode::destroy(&*effect);
        } else {
            let consumer: Weak<dyn SignalConsumer<T>> = effect.weak_self.clone();
            effect.signal.subscribe(consumer);
        }
        effect
    }

    fn run(&self, value: T) {
        if self.core.is_destroyed() {
            return;
        }
        self.core.execute(&self.action, value);
    }
}

impl<T: Clone + 'static, R: Clone + 'static> SignalConsumer<T> for SignalEffect<T, R> {
    fn consumer_id(&self) -> NodeId {
        self.core.id
    }

    fn notify(&self, value: T) {
        if self.core.is_destroyed() {
            return;
        }
        let weak = self.weak_self.clone();
        self.core.scheduler.schedule(Box::new(move || {
            if let Some(effect) = weak.upgrade() {
                effect.run(value);
            }
            Ok(())
        }));
    }

    fn destroy(&self) {
        EffectNode::destroy(self);
    }
}

impl<T: Clone + 'static, R: Clone + 'static> EffectNode<R> for SignalEffect<T, R> {
    fn core(&self) -> &EffectCore<R> {
        &self.core
    }

    fn destroy(&self) {
        if self.core.destroyed.replace(true) {
            return;
        }

        self.signal.unsubscribe(self.core.id);
        if let Ok(mut action) = self.action.try_borrow_mut() {
            action.take();
        }
        self.core.teardown();
    }
}
