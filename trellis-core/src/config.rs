//! Runtime configuration.
//!
//! Hosts normally build a [`RuntimeConfig`] in code, but it can also be read
//! from JSON so that tick pacing can live next to the rest of an
//! application's settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which frames of the effect stack subscribe when a member is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Every observer on the stack subscribes. A parent whose tracked
    /// computation runs a nested observer also depends on what the child read.
    #[default]
    AllFrames,
    /// Only the innermost running observer subscribes.
    TopFrame,
}

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Period of the [`TickDriver`](crate::graph::TickDriver), in milliseconds.
    pub tick_interval_ms: u64,

    /// Upper bound on observer runs within one tick.
    pub max_runs_per_tick: usize,

    /// Prune dead dependency entries when a tick leaves the queues empty.
    pub prune_on_idle: bool,

    pub tracking: TrackingMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            max_runs_per_tick: 10_000,
            prune_on_idle: true,
            tracking: TrackingMode::AllFrames,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
