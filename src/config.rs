//! Configuration for the task manager.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_LONG_TASK_WARNING_SECS, MAX_LONG_TASK_WARNING_SECS};

/// Tuning knobs for a [`TaskManager`](crate::manager::TaskManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Warn when a single batch takes longer than this many seconds to
    /// complete (0 = disabled).
    pub long_task_warning_secs: u64,
    /// Log each completed task's result at debug level.
    pub log_task_results: bool,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            long_task_warning_secs: DEFAULT_LONG_TASK_WARNING_SECS,
            log_task_results: false,
        }
    }
}

impl TaskManagerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.long_task_warning_secs > MAX_LONG_TASK_WARNING_SECS {
            anyhow::bail!(
                "long_task_warning_secs cannot exceed {} (24 hours), got {}",
                MAX_LONG_TASK_WARNING_SECS,
                self.long_task_warning_secs
            );
        }
        Ok(())
    }
}
