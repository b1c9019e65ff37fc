use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const fn default_task_inactivity_timeout_secs() -> u64 {
    300
}

const fn default_buffer_flush_threshold_bytes() -> usize {
    64 * 1024 * 1024
}

const fn default_merge_batch_size() -> usize {
    1_000
}

/// The shared tunables of the storage and merge subsystem. Everything else
/// is task- or store-local.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Heartbeat silence after which a task counts as abandoned.
    #[serde(default = "default_task_inactivity_timeout_secs")]
    pub task_inactivity_timeout_secs: u64,

    /// Per-type write buffer size that triggers a flush.
    #[serde(default = "default_buffer_flush_threshold_bytes")]
    pub buffer_flush_threshold_bytes: usize,

    /// Containers merged per `merge_containers` step; 0 means unbounded.
    #[serde(default = "default_merge_batch_size")]
    pub merge_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_inactivity_timeout_secs: default_task_inactivity_timeout_secs(),
            buffer_flush_threshold_bytes: default_buffer_flush_threshold_bytes(),
            merge_batch_size: default_merge_batch_size(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validates configuration sanity.
    pub fn validate(&self) -> EngineResult<()> {
        if self.task_inactivity_timeout_secs == 0 {
            return Err(EngineError::Config(
                "task_inactivity_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.buffer_flush_threshold_bytes == 0 {
            return Err(EngineError::Config(
                "buffer_flush_threshold_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.task_inactivity_timeout_secs)
    }
}
