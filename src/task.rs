//! Task model: a named-operation invocation request with positional
//! arguments and an optional result callback.

use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::error::TaskError;

/// Unique identifier assigned to a task at submission time.
pub type TaskId = Uuid;

/// Outcome delivered to a task's callback: the operation's return value, or
/// the typed error it failed with.
pub type TaskResult = Result<Value, TaskError>;

/// Handler invoked exactly once with a task's result, on the manager's
/// dispatcher context.
pub type TaskCallback = Box<dyn FnOnce(TaskResult) + Send + 'static>;

/// A unit of requested work.
///
/// Created by [`TaskManager::add_task`](crate::manager::TaskManager::add_task)
/// and held in exactly one of the manager's queued/pending/running collections
/// until its result is delivered.
pub struct Task {
    /// Unique identifier, assigned at submission time.
    pub id: TaskId,
    /// Registered operation to invoke, or `None` to deliver the arguments
    /// directly as the result.
    pub operation: Option<String>,
    /// Ordered positional arguments.
    pub args: Vec<Value>,
    pub(crate) callback: Option<TaskCallback>,
}

impl Task {
    pub(crate) fn new(
        operation: Option<String>,
        callback: Option<TaskCallback>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            args,
            callback,
        }
    }

    /// Whether this task has a result callback attached.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("args", &self.args)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
