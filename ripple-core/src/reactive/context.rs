//! Tracking Context
//!
//! The tracking context records which atoms are read while an effect
//! evaluates its source, and forbids atom writes while a pure evaluation
//! (an effect source or a computed function) is running.
//!
//! # Implementation
//!
//! Every state change is paired with a guard that restores the previous
//! state when dropped, so the context stays consistent even if user code
//! panics halfway through an evaluation.
//!
//! Two modes exist:
//!
//! - A *tracked run* (see [`TrackingContext::enter_tracked`]) collects a fresh
//!   list of atom sources on behalf of one effect. Tracked runs do not nest.
//! - The *tracked flag* alone (see [`TrackingContext::set_tracked`]) is what
//!   computed nodes and untracked sections toggle. It leaves the collected
//!   sources untouched, so atoms read by a computed inside an effect's source
//!   are still discovered by that effect.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use super::atom::AtomNode;
use super::subscriber::NodeId;
use crate::error::{ReactiveError, Result};

/// Atoms discovered during a tracked run, in first-read order.
pub(crate) type AtomSources = IndexMap<NodeId, Rc<dyn AtomNode>>;

/// Per-runtime tracking state.
pub(crate) struct TrackingContext {
    tracked: Cell<bool>,
    sources: RefCell<Option<AtomSources>>,
    active_effect: Cell<Option<NodeId>>,
}

impl TrackingContext {
    pub(crate) fn new() -> Self {
        Self {
            tracked: Cell::new(false),
            sources: RefCell::new(None),
            active_effect: Cell::new(None),
        }
    }

    /// Whether a pure evaluation is running.
    pub(crate) fn is_tracked(&self) -> bool {
        self.tracked.get()
    }

    /// The effect whose source is being evaluated, if any.
    pub(crate) fn active_effect(&self) -> Option<NodeId> {
        self.active_effect.get()
    }

    /// Start collecting atom sources on behalf of `effect`.
    pub(crate) fn enter_tracked(&self, effect: NodeId) -> Result<TrackedRun<'_>> {
        if self.tracked.get() {
            return Err(ReactiveError::TrackedReentry);
        }

        let prev_sources = self.sources.replace(Some(IndexMap::new()));
        let prev_effect = self.active_effect.replace(Some(effect));
        self.tracked.set(true);

        Ok(TrackedRun {
            ctx: self,
            prev_sources,
            prev_effect,
        })
    }

    /// Set the tracked flag until the returned guard is dropped.
    pub(crate) fn set_tracked(&self, tracked: bool) -> TrackedFlag<'_> {
        let prev = self.tracked.replace(tracked);
        TrackedFlag { ctx: self, prev }
    }

    /// Record that `atom` was read. Ignored outside a tracked run or while
    /// the tracked flag is cleared.
    pub(crate) fn record(&self, atom: Rc<dyn AtomNode>) {
        if !self.tracked.get() {
            return;
        }
        if let Some(sources) = self.sources.borrow_mut().as_mut() {
            sources.entry(atom.node_id()).or_insert(atom);
        }
    }
}

/// Guard for a tracked run. Dropping it restores the previous state.
pub(crate) struct TrackedRun<'a> {
    ctx: &'a TrackingContext,
    prev_sources: Option<AtomSources>,
    prev_effect: Option<NodeId>,
}

impl TrackedRun<'_> {
    /// End the run and return the atoms read during it.
    pub(crate) fn finish(self) -> AtomSources {
        let sources = self.ctx.sources.borrow_mut().take();
        sources.unwrap_or_default()
    }
}

impl Drop for TrackedRun<'_> {
    fn drop(&mut self) {
        self.ctx.tracked.set(false);
        *self.ctx.sources.borrow_mut() = self.prev_sources.take();
        self.ctx.active_effect.set(self.prev_effect);
    }
}

/// Guard restoring the previous tracked flag.
pub(crate) struct TrackedFlag<'a> {
    ctx: &'a TrackingContext,
    prev: bool,
}

impl Drop for TrackedFlag<'_> {
    fn drop(&mut self) {
        self.ctx.tracked.set(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::AtomConsumer;
    use std::rc::Weak;

    struct FakeAtom(NodeId);

    impl AtomNode for FakeAtom {
        fn node_id(&self) -> NodeId {
            self.0
        }

        fn subscribe(&self, _consumer: Weak<dyn AtomConsumer>) {}

        fn unsubscribe(&self, _id: NodeId) {}
    }

    fn fake() -> Rc<dyn AtomNode> {
        Rc::new(FakeAtom(NodeId::new()))
    }

    #[test]
    fn tracked_run_collects_unique_sources() {
        let ctx = TrackingContext::new();
        let effect = NodeId::new();
        let a = fake();
        let b = fake();

        let run = ctx.enter_tracked(effect).unwrap();
        assert!(ctx.is_tracked());
        assert_eq!(ctx.active_effect(), Some(effect));

        ctx.record(a.clone());
        ctx.record(b.clone());
        ctx.record(a.clone());

        let sources = run.finish();
        let ids: Vec<_> = sources.keys().copied().collect();
        assert_eq!(ids, vec![a.node_id(), b.node_id()]);

        assert!(!ctx.is_tracked());
        assert_eq!(ctx.active_effect(), None);
    }

    #[test]
    fn tracked_runs_do_not_nest() {
        let ctx = TrackingContext::new();
        let _run = ctx.enter_tracked(NodeId::new()).unwrap();

        assert!(matches!(
            ctx.enter_tracked(NodeId::new()),
            Err(ReactiveError::TrackedReentry)
        ));
    }

    #[test]
    fn untracked_reads_are_not_recorded() {
        let ctx = TrackingContext::new();
        let run = ctx.enter_tracked(NodeId::new()).unwrap();

        {
            let _untracked = ctx.set_tracked(false);
            ctx.record(fake());
        }
        assert!(ctx.is_tracked());

        assert!(run.finish().is_empty());
    }

    #[test]
    fn reads_outside_a_run_are_ignored() {
        let ctx = TrackingContext::new();
        let _flag = ctx.set_tracked(true);
        ctx.record(fake());
        assert!(ctx.sources.borrow().is_none());
    }
}
