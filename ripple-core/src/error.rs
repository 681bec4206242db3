//! Reactive Errors
//!
//! Every failure the engine can surface is a [`ReactiveError`]. Errors are
//! cheap to clone because a computed node caches its error and hands a copy
//! back on every read until it recomputes successfully.

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

/// Convenience alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by atoms, computed nodes, effects, schedulers and scopes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReactiveError {
    /// A computed node read itself, directly or transitively.
    ///
    /// The error is cached as the node's state until the next successful
    /// recompute.
    #[error("cycle detected while computing {}", display_name(.name))]
    Cycle {
        /// Name of the computed node that was re-entered.
        name: Option<Rc<str>>,
    },

    /// An atom was written while a pure (tracked) evaluation was running.
    #[error("cannot update {} in a tracked context", display_name(.name))]
    TrackedMutation {
        /// Name of the atom that was written.
        name: Option<Rc<str>>,
    },

    /// A tracked run was started while another one was active.
    #[error("tracked execution is not reentrant")]
    TrackedReentry,

    /// One or more scope teardowns failed.
    ///
    /// All teardowns still ran; this collects every failure in order.
    #[error("{} teardown(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ReactiveError>),

    /// An error raised by user code: an effect action, a computed function or
    /// a teardown callback.
    #[error("{0}")]
    Custom(Rc<dyn StdError>),
}

impl ReactiveError {
    /// Wrap an arbitrary error raised by user code.
    pub fn custom<E>(error: E) -> Self
    where
        E: StdError + 'static,
    {
        Self::Custom(Rc::new(error))
    }

    /// Build a user error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Custom(Rc::new(Message(message.into())))
    }

    /// Whether this is a cycle error.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }

    /// The nested errors of an aggregate, or an empty slice.
    pub fn errors(&self) -> &[ReactiveError] {
        match self {
            Self::Aggregate(errors) => errors,
            _ => &[],
        }
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

fn display_name(name: &Option<Rc<str>>) -> String {
    match name {
        Some(name) => format!("`{name}`"),
        None => "<anonymous>".to_string(),
    }
}

fn join_errors(errors: &[ReactiveError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_errors_display_their_text() {
        let err = ReactiveError::msg("e1");
        assert_eq!(err.to_string(), "e1");
    }

    #[test]
    fn named_errors_include_the_name() {
        let err = ReactiveError::Cycle {
            name: Some(Rc::from("total")),
        };
        assert!(err.is_cycle());
        assert_eq!(err.to_string(), "cycle detected while computing `total`");

        let err = ReactiveError::TrackedMutation { name: None };
        assert_eq!(err.to_string(), "cannot update <anonymous> in a tracked context");
    }

    #[test]
    fn aggregate_exposes_nested_errors() {
        let err = ReactiveError::Aggregate(vec![ReactiveError::msg("a"), ReactiveError::msg("b")]);
        assert_eq!(err.errors().len(), 2);
        assert_eq!(err.to_string(), "2 teardown(s) failed: a; b");
        assert!(ReactiveError::TrackedReentry.errors().is_empty());
    }
}
