//! Effects driven by atoms.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Action, AtomList, EffectCore, EffectNode, Versions};
use crate::reactive::context::AtomSources;
use crate::reactive::subscriber::{AtomConsumer, NodeId};

pub(super) struct AtomEffect<T, R> {
    core: EffectCore<R>,
    source: AtomList<T>,
    action: RefCell<Option<Action<T, R>>>,
    dirty: Cell<bool>,
    dependencies: RefCell<AtomSources>,
    last_versions: RefCell<Option<Versions>>,
    weak_self: Weak<AtomEffect<T, R>>,
}

impl<T: Clone + 'static, R: Clone + 'static> AtomEffect<T, R> {
    /// Build the effect and schedule its first run. An effect whose atoms
    /// are all destroyed comes back already destroyed.
    pub(super) fn create(core: EffectCore<R>, source: AtomList<T>, action: Action<T, R>) -> Rc<Self> {
        let effect = Rc::new_cyclic(|weak_self| Self {
            core,
            source,
            action: RefCell::new(Some(action)),
            dirty: Cell::new(false),
            dependencies: RefCell::new(AtomSources::new()),
            last_versions: RefCell::new(None),
            weak_self: weak_self.clone(),
        });
        if (effect.source.orphaned)() {
            EffectNode::destroy(&*effect);
        } else {
            effect.notify();
        }
        effect
    }

    fn schedule_run(&self) {
        let weak = self.weak_self.clone();
        self.core.scheduler.schedule(Box::new(move || {
            if let Some(effect) = weak.upgrade() {
                effect.run();
            }
            Ok(())
        }));
    }

    fn run(&self) {
        if self.core.is_destroyed() {
            return;
        }
        self.dirty.set(false);

        let tracked = self.core.runtime.run_as_tracked(self.core.id, || (self.source.read)());
        let (result, sources) = match tracked {
            Ok(tracked) => tracked,
            Err(error) => {
                self.core.report(error);
                return;
            }
        };
        self.sync_dependencies(sources);

        // Atoms destroyed before the first run were never subscribed to, so
        // no `notify_destroy` will arrive for them.
        if self.dependencies.borrow().is_empty() && (self.source.orphaned)() {
            EffectNode::destroy(self);
            return;
        }

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                *self.last_versions.borrow_mut() = None;
                self.core.report(error);
                return;
            }
        };

        let versions = (self.source.versions)();
        {
            let mut last = self.last_versions.borrow_mut();
            if last.as_ref() == Some(&versions) {
                tracing::trace!(effect = self.core.id.raw(), "source unchanged; action skipped");
                return;
            }
            *last = Some(versions);
        }

        self.core.execute(&self.action, value);
    }

    /// Subscribe to atoms read for the first time and leave the ones no
    /// longer read.
    fn sync_dependencies(&self, next: AtomSources) {
        let consumer: Weak<dyn AtomConsumer> = self.weak_self.clone();
        let mut dependencies = self.dependencies.borrow_mut();

        for (id, atom) in dependencies.iter() {
            if !next.contains_key(id) {
                atom.unsubscribe(self.core.id);
            }
        }
        for (id, atom) in next.iter() {
            if !dependencies.contains_key(id) {
                atom.subscribe(consumer.clone());
            }
        }
        *dependencies = next;
    }
}

impl<T: Clone + 'static, R: Clone + 'static> AtomConsumer for AtomEffect<T, R> {
    fn consumer_id(&self) -> NodeId {
        self.core.id
    }

    fn notify(&self) {
        if self.core.is_destroyed() || self.dirty.replace(true) {
            return;
        }
        self.schedule_run();
    }

    fn notify_destroy(&self, source: NodeId) {
        let orphaned = {
            let mut dependencies = self.dependencies.borrow_mut();
            dependencies.shift_remove(&source);
            dependencies.is_empty()
        };
        if orphaned {
            EffectNode::destroy(self);
        }
    }
}

impl<T: Clone + 'static, R: Clone + 'static> EffectNode<R> for AtomEffect<T, R> {
    fn core(&self) -> &EffectCore<R> {
        &self.core
    }

    fn destroy(&self) {
        if self.core.destroyed.replace(true) {
            return;
        }

        let dependencies = std::mem::take(&mut *self.dependencies.borrow_mut());
        for atom in dependencies.values() {
            atom.unsubscribe(self.core.id);
        }
        if let Ok(mut action) = self.action.try_borrow_mut() {
            action.take();
        }
        self.core.teardown();
    }
}

#[cfg(test)]
mod tests {
    use crate::reactive::{EffectOptions, Runtime};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn first_run_is_deferred_to_the_microtask_queue() {
        let rt = Runtime::new();
        let count = rt.atom(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = rt.effect(&count, move |value: i32, _| {
            seen_clone.borrow_mut().push(value);
            Ok(())
        });
        assert!(seen.borrow().is_empty());

        rt.run_microtasks();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn notifications_coalesce_into_one_run() {
        let rt = Runtime::new();
        let count = rt.atom(0);
        let runs = Rc::new(RefCell::new(Vec::new()));
        let runs_clone = runs.clone();

        let _sub = rt.effect(&count, move |value: i32, _| {
            runs_clone.borrow_mut().push(value);
            Ok(())
        });
        rt.run_microtasks();

        count.set(1).unwrap();
        count.set(2).unwrap();
        count.set(3).unwrap();
        rt.run_microtasks();

        assert_eq!(*runs.borrow(), vec![0, 3]);
    }

    #[test]
    fn equal_computed_result_skips_the_action() {
        let rt = Runtime::new();
        let count = rt.atom(1);
        let reader = count.clone();
        let parity = rt.compute(move || Ok(reader.get() % 2));
        let runs = Rc::new(RefCell::new(0));
        let runs_clone = runs.clone();

        let _sub = rt.effect_with(
            &parity,
            move |_: i32, _| {
                *runs_clone.borrow_mut() += 1;
                Ok(())
            },
            EffectOptions::default().sync(true),
        );
        assert_eq!(*runs.borrow(), 1);

        count.set(3).unwrap();
        assert_eq!(*runs.borrow(), 1);

        count.set(4).unwrap();
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn dependencies_follow_the_branch_taken() {
        let rt = Runtime::new();
        let flag = rt.atom(true);
        let left = rt.atom(1);
        let right = rt.atom(2);
        let (f, l, r) = (flag.clone(), left.clone(), right.clone());
        let picked = rt.compute(move || Ok(if f.get() { l.get() } else { r.get() }));

        let _sub = rt.sync_effect(&picked, |_: i32, _| Ok(()));
        assert_eq!(left.consumer_count(), 1);
        assert_eq!(right.consumer_count(), 0);

        flag.set(false).unwrap();
        assert_eq!(left.consumer_count(), 0);
        assert_eq!(right.consumer_count(), 1);
    }

    #[test]
    fn destroying_the_only_dependency_destroys_the_effect() {
        let rt = Runtime::new();
        let count = rt.atom(0);
        let sub = rt.sync_effect(&count, |_: i32, _| Ok(()));

        count.destroy();
        assert!(sub.is_destroyed());
    }

    #[test]
    fn losing_one_of_several_atoms_keeps_the_effect_alive() {
        let rt = Runtime::new();
        let a = rt.atom(0);
        let b = rt.atom(0);
        let runs = Rc::new(RefCell::new(Vec::new()));
        let runs_clone = runs.clone();

        let sub = rt.effect_with(
            vec![a.as_readonly(), b.as_readonly()],
            move |values: Vec<i32>, _| {
                runs_clone.borrow_mut().push(values);
                Ok(())
            },
            EffectOptions::default().sync(true),
        );

        a.destroy();
        assert!(!sub.is_destroyed());

        b.set(5).unwrap();
        assert_eq!(*runs.borrow(), vec![vec![0, 0], vec![0, 5]]);

        b.destroy();
        assert!(sub.is_destroyed());
    }

    #[test]
    fn effect_on_a_destroyed_atom_is_destroyed() {
        let rt = Runtime::new();
        let count = rt.atom(0);
        count.destroy();
        let runs = Rc::new(RefCell::new(0));
        let runs_clone = runs.clone();

        let sub = rt.sync_effect(&count, move |_: i32, _| {
            *runs_clone.borrow_mut() += 1;
            Ok(())
        });

        assert!(sub.is_destroyed());
        assert_eq!(*runs.borrow(), 0);
    }

    #[test]
    fn atom_destroyed_before_the_first_run_destroys_the_effect() {
        let rt = Runtime::new();
        let count = rt.atom(0);
        let runs = Rc::new(RefCell::new(0));
        let runs_clone = runs.clone();

        let sub = rt.effect(&count, move |_: i32, _| {
            *runs_clone.borrow_mut() += 1;
            Ok(())
        });
        count.destroy();
        assert!(!sub.is_destroyed());

        rt.run_microtasks();
        assert!(sub.is_destroyed());
        assert_eq!(*runs.borrow(), 0);
    }

    #[test]
    fn dropping_the_handle_stops_the_effect() {
        let rt = Runtime::new();
        let count = rt.atom(0);
        let runs = Rc::new(RefCell::new(0));
        let runs_clone = runs.clone();

        let sub = rt.sync_effect(&count, move |_: i32, _| {
            *runs_clone.borrow_mut() += 1;
            Ok(())
        });
        drop(sub);

        count.set(1).unwrap();
        assert_eq!(*runs.borrow(), 1);
        assert_eq!(count.consumer_count(), 0);
    }
}
