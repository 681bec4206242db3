//! Reactive Primitives
//!
//! This module implements the reactive graph: atoms, computed nodes, signals
//! and effects, all created through a [`Runtime`].
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An atom is a container for mutable state with a version that advances on
//! every accepted change. Writes are gated by an equality function, so
//! setting an equal value notifies nobody.
//!
//! ## Computed Nodes
//!
//! A computed node is a derived value that caches its result. It is lazy and
//! pull-based: it recomputes on read, and only when the runtime clock says
//! some atom changed since the last run. Computed nodes hold no subscribers
//! themselves; effects reading them subscribe to the atoms underneath.
//!
//! ## Signals
//!
//! A signal is a stateless event emitter. Effects on a signal run once per
//! event.
//!
//! ## Effects
//!
//! An effect is the only consumer in the graph. It runs its action when its
//! source changes, on either the synchronous or the microtask scheduler.
//!
//! # Implementation Notes
//!
//! The graph is single-threaded. Producers hold weak references to their
//! consumers, so dropping every handle to an effect unsubscribes it the next
//! time its producers notify. Dependency discovery uses a tracking context
//! stored in the runtime: while an effect evaluates its source, every atom
//! read is recorded, and atom writes fail.

mod atom;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;

pub use atom::{Atom, AtomOptions, EqualFn, WritableAtom, MAX_SAFE_VERSION};
pub use computed::ComputeOptions;
pub use effect::{ActionOutput, AtomList, EffectContext, EffectOptions, EffectSource, EffectSubscription};
pub use runtime::Runtime;
pub use signal::{Signal, SignalOptions};
pub use subscriber::{AtomConsumer, NodeId, SignalConsumer};
