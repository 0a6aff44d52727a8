use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_GLOBALS_NODE;
use crate::Error;
use crate::Result;

/// Tuning for the watch and resolve loops.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Capacity of the shared signal channel between watch loops and the responder
    #[serde(default = "default_signal_buffer_size")]
    pub signal_buffer_size: usize,

    /// Session establishment timeout (unit: milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Session establishment attempts before the start operation fails
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,

    /// How many levels of path lists are followed before giving up
    #[serde(default = "default_max_indirection_depth")]
    pub max_indirection_depth: usize,

    /// Name of the shared sibling node next to the service node
    #[serde(default = "default_globals_node")]
    pub globals_node: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            signal_buffer_size: default_signal_buffer_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            max_indirection_depth: default_max_indirection_depth(),
            globals_node: default_globals_node(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.signal_buffer_size == 0 {
            return Err(Error::InvalidConfig("sync.signal_buffer_size cannot be 0".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig("sync.connect_timeout_ms cannot be 0".into()));
        }
        if self.max_indirection_depth == 0 {
            return Err(Error::InvalidConfig("sync.max_indirection_depth cannot be 0".into()));
        }
        if self.globals_node.is_empty() || self.globals_node.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "sync.globals_node {:?} must be a single path segment",
                self.globals_node
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_signal_buffer_size() -> usize {
    64
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_connect_attempts() -> usize {
    3
}
fn default_max_indirection_depth() -> usize {
    8
}
fn default_globals_node() -> String {
    DEFAULT_GLOBALS_NODE.to_string()
}
