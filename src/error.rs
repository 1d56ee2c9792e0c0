//! Typed errors produced while executing tasks.

use thiserror::Error;

/// Error produced by the worker while executing a single task.
///
/// Errors are delivered to the task's callback as an `Err` result; they never
/// abort the rest of the batch.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task referenced an operation name that was never registered.
    #[error("unknown operation '{name}'")]
    UnknownOperation { name: String },

    /// The registered operation returned an error.
    #[error("operation '{name}' failed: {source}")]
    OperationFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TaskError {
    /// Name of the operation this error originated from.
    pub fn operation_name(&self) -> &str {
        match self {
            TaskError::UnknownOperation { name } => name,
            TaskError::OperationFailure { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_operation_display() {
        let error = TaskError::UnknownOperation {
            name: "resize".to_string(),
        };
        assert_eq!(error.to_string(), "unknown operation 'resize'");
        assert_eq!(error.operation_name(), "resize");
    }

    #[test]
    fn test_operation_failure_carries_source() {
        let error = TaskError::OperationFailure {
            name: "export".to_string(),
            source: anyhow::anyhow!("disk full"),
        };
        assert_eq!(error.to_string(), "operation 'export' failed: disk full");
        assert!(std::error::Error::source(&error).is_some());
    }
}
