//! Runtime Configuration
//!
//! A [`RuntimeConfig`] decides how a [`Runtime`](crate::reactive::Runtime)
//! drives its deferred work. It is plain data so hosts can load it from the
//! same JSON documents they already use for the rest of their settings.

use serde::{Deserialize, Serialize};

/// Backend used by the microtask scheduler to request a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrotaskMode {
    /// Flushes are queued on the runtime and run by
    /// [`Runtime::run_microtasks`](crate::reactive::Runtime::run_microtasks).
    #[default]
    Manual,

    /// Flushes are spawned with `tokio::task::spawn_local`.
    ///
    /// Effects must then be created and notified inside a `LocalSet`.
    Tokio,
}

/// Settings for a reactive runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Atom-effects created without an explicit `sync` option run on the
    /// synchronous scheduler when this is set.
    pub sync_effects: bool,

    /// How deferred flushes are requested.
    pub microtasks: MicrotaskMode,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
