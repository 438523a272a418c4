//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the poll loop and its error handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Server-side long-poll hold in seconds. The HTTP deadline is padded
    /// past this automatically.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// First backoff wait after a poll failure, in seconds.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Backoff ceiling in seconds.
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
        }
    }
}

impl PollConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }
}

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_ceiling_secs() -> u64 {
    60
}
