//! Watcher configuration
//!
//! Every field has a default, so a TOML document only needs the keys it
//! overrides:
//!
//! ```toml
//! initial_buffer_capacity = 512
//! rename_window_ms = 250
//! ```

use multiwatch_core::WatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the file watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Raw events a directory buffer holds before it overflows (default: 1024)
    pub initial_buffer_capacity: usize,

    /// Upper bound for buffer growth after repeated overflows (default: 65536)
    pub max_buffer_capacity: usize,

    /// How long a move-out waits for its matching move-in before it is
    /// treated as a deletion (default: 100ms)
    pub rename_window_ms: u64,

    /// Name prefix for directory worker threads (default: "multiwatch")
    pub worker_thread_prefix: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            initial_buffer_capacity: 1024,
            max_buffer_capacity: 65536,
            rename_window_ms: 100,
            worker_thread_prefix: "multiwatch".to_string(),
        }
    }
}

impl WatcherConfig {
    /// Parse a configuration from TOML
    pub fn from_toml_str(source: &str) -> Result<Self, WatchError> {
        let config: Self =
            toml::from_str(source).map_err(|e| WatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, WatchError> {
        let source = std::fs::read_to_string(path).map_err(|e| WatchError::io(path, e))?;
        Self::from_toml_str(&source)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String, WatchError> {
        toml::to_string(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Check the configuration for values the watcher cannot run with
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.initial_buffer_capacity == 0 {
            return Err(WatchError::Config(
                "initial_buffer_capacity must be at least 1".to_string(),
            ));
        }

        if self.max_buffer_capacity < self.initial_buffer_capacity {
            return Err(WatchError::Config(format!(
                "max_buffer_capacity ({}) is below initial_buffer_capacity ({})",
                self.max_buffer_capacity, self.initial_buffer_capacity
            )));
        }

        Ok(())
    }

    /// Rename pairing window as a duration
    pub fn rename_window(&self) -> Duration {
        Duration::from_millis(self.rename_window_ms)
    }
}
