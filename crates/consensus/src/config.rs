//! Engine configuration.

use std::time::Duration;

/// Tunables of the coordination engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Commands batched into one proposal by the proposer.
    pub blk_size: usize,

    /// How long an outstanding block request may stay unanswered before
    /// the next candidate peer is tried.
    pub fetch_timeout: Duration,

    /// Interval of the fetch retry sweep.
    pub fetch_tick: Duration,

    /// Interval of the statistics log line.
    pub stats_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            blk_size: 1,
            fetch_timeout: Duration::from_millis(500),
            fetch_tick: Duration::from_millis(100),
            stats_interval: Duration::from_secs(10),
        }
    }
}
