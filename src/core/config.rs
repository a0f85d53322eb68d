use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::errors::{GridflowError, Result};

/// Configuration for queue scheduling behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base admission polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fraction of the poll interval added as random jitter per tick (0.0..=1.0)
    #[serde(default = "default_poll_jitter")]
    pub poll_jitter: f64,
    /// How long terminal actions stay visible to observers before being dropped
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Capacity of the lifecycle event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_poll_jitter() -> f64 {
    0.25
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_jitter: default_poll_jitter(),
            grace_period_ms: default_grace_period_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl QueueConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(GridflowError::configuration(
                "poll_interval_ms must be greater than 0",
            ));
        }
        // Queued actions must remain responsive
        if self.poll_interval_ms > 1_000 {
            return Err(GridflowError::configuration(
                "poll_interval_ms cannot exceed 1000",
            ));
        }
        if !(0.0..=1.0).contains(&self.poll_jitter) {
            return Err(GridflowError::configuration(
                "poll_jitter must be within 0.0..=1.0",
            ));
        }
        if self.grace_period_ms > 60_000 {
            return Err(GridflowError::configuration(
                "grace_period_ms cannot exceed 60 seconds",
            ));
        }
        if self.event_capacity == 0 {
            return Err(GridflowError::configuration(
                "event_capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// One poll delay with jitter applied, so co-queued actions decorrelate
    pub fn jittered_poll_delay(&self) -> Duration {
        let base = self.poll_interval_ms as f64;
        let jitter = base * self.poll_jitter * fastrand::f64();
        Duration::from_millis((base + jitter) as u64)
    }
}
