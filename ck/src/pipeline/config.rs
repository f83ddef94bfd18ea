//! Kernel configuration

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Pipeline controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Buffer size for requests to the controller
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Outbound event capacity; slow subscribers lag beyond this
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Upper bound for a single engine call; unset waits indefinitely
    #[serde(rename = "stage-timeout-ms", default)]
    pub stage_timeout_ms: Option<u64>,
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    100
}

fn default_event_capacity() -> usize {
    debug!("default_event_capacity: called");
    1024
}

impl Default for KernelConfig {
    fn default() -> Self {
        debug!("KernelConfig::default: called");
        Self {
            channel_buffer: default_channel_buffer(),
            event_capacity: default_event_capacity(),
            stage_timeout_ms: None,
        }
    }
}

impl KernelConfig {
    /// Stage timeout as a Duration
    pub fn stage_timeout(&self) -> Option<Duration> {
        debug!(stage_timeout_ms = ?self.stage_timeout_ms, "KernelConfig::stage_timeout: called");
        self.stage_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the runtime cannot honour
    ///
    /// Both queues need room for at least one message.
    pub fn validate(&self) -> Result<()> {
        debug!(?self, "KernelConfig::validate: called");
        if self.channel_buffer == 0 {
            return Err(eyre!("kernel.channel-buffer must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(eyre!("kernel.event-capacity must be at least 1"));
        }
        Ok(())
    }
}
