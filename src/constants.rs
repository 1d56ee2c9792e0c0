//! Constants and default values used throughout the library.

/// Default threshold, in seconds, after which a still-running batch is
/// reported with a warning when it finishes.
pub const DEFAULT_LONG_TASK_WARNING_SECS: u64 = 30;

/// Upper bound accepted for the long-task warning threshold (24 hours).
pub const MAX_LONG_TASK_WARNING_SECS: u64 = 86_400;

/// Prefix used for sibling temporary files created by the atomic save manager.
pub const TEMPFILE_PREFIX: &str = ".temp_";

/// Timestamp format used by the logger setup.
pub const LOG_TIMESTAMP_FORMAT: &str = "%H:%M:%S%.3f";
