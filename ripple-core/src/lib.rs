//! Ripple Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Writable atoms with equality-gated, versioned updates
//! - Lazy computed values with glitch-free reads and cycle detection
//! - Signals for stateless events
//! - Effects scheduled synchronously or on a microtask queue
//! - Scopes that tear down groups of resources at once
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the runtime and the reactive primitives
//! - `scheduler`: task queues for synchronous and deferred effect runs
//! - `scope`: resource-lifetime containers
//! - `config`: runtime configuration
//! - `error`: the error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create an atom
//! let count = rt.atom(1);
//!
//! // Create a derived value
//! let reader = count.clone();
//! let doubled = rt.compute(move || Ok(reader.get() * 2));
//!
//! // Create an effect
//! let _log = rt.effect(&doubled, |value: i32, _| {
//!     println!("doubled: {value}");
//!     Ok(())
//! });
//!
//! // Update the atom; the effect runs on the next microtask flush
//! count.set(5).unwrap();
//! rt.run_microtasks();
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;
pub mod scope;

pub use config::{MicrotaskMode, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use reactive::Runtime;
pub use scope::Scope;
