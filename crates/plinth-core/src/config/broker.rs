//! Broker invocation limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied to every dispatched action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Timeout for actions whose manifest does not set one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL when an action times out.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Cap on captured stdout and stderr, each.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Upper bound on concurrently running actions (unbounded if unset).
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Serialize invocations of the same action unless its manifest says otherwise.
    #[serde(default = "default_true")]
    pub serialize_same_action: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
            max_output_bytes: default_max_output_bytes(),
            max_concurrent: None,
            serialize_same_action: true,
        }
    }
}

impl BrokerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_max_output_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_true() -> bool {
    true
}
