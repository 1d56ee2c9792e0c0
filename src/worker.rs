//! Worker: a named operation registry plus a sequential batch executor.
//!
//! Operations are registered by name before the worker is handed to a
//! [`TaskManager`](crate::manager::TaskManager); the registry is immutable
//! after that point, so a failed lookup at execution time is a typed error
//! rather than a silent miss.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TaskError;
use crate::task::{TaskId, TaskResult};

/// A named operation callable by tasks.
///
/// Implement this trait directly for stateful operations, or use
/// [`Worker::register`] to wrap an async closure.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Invoke the operation with the task's positional arguments.
    async fn call(&self, args: Vec<Value>) -> Result<Value>;
}

type OperationFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

struct FnOperation {
    f: Box<dyn Fn(Vec<Value>) -> OperationFuture + Send + Sync>,
}

#[async_trait]
impl Operation for FnOperation {
    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        (self.f)(args).await
    }
}

/// One task as handed to the worker: the callback stays behind with the
/// manager, which routes results back by id.
#[derive(Debug)]
pub(crate) struct BatchTask {
    pub id: TaskId,
    pub operation: Option<String>,
    pub args: Vec<Value>,
}

/// Events emitted by the worker back to the manager's dispatcher loop.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    TaskCompleted { id: TaskId, result: TaskResult },
    BatchFinished,
}

/// Executes batches of tasks sequentially and reports each result.
pub struct Worker {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl Worker {
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Associate a name with an operation. Re-registering a name replaces the
    /// previous operation.
    pub fn register_operation(&mut self, name: impl Into<String>, operation: Arc<dyn Operation>) {
        let name = name.into();
        debug!("registered operation '{}'", name);
        self.operations.insert(name, operation);
    }

    /// Register an async closure as an operation.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed = move |args: Vec<Value>| -> OperationFuture { Box::pin(f(args)) };
        self.register_operation(
            name,
            Arc::new(FnOperation { f: Box::new(boxed) }),
        );
    }

    /// Whether an operation is registered under `name`.
    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Number of registered operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Execute a batch strictly in submission order, emitting one
    /// `TaskCompleted` per task and exactly one `BatchFinished` at the end.
    ///
    /// A failing task does not abort the batch; its error is reported as that
    /// task's result and execution continues.
    pub(crate) async fn run(
        self: Arc<Self>,
        batch: Vec<BatchTask>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        debug!("worker starting batch of {} task(s)", batch.len());
        for task in batch {
            let id = task.id;
            let result = self.execute(task).await;
            let _ = events.send(WorkerEvent::TaskCompleted { id, result });
        }
        let _ = events.send(WorkerEvent::BatchFinished);
    }

    async fn execute(&self, task: BatchTask) -> TaskResult {
        match task.operation {
            // No operation: the argument list itself is the result.
            None => Ok(Value::Array(task.args)),
            Some(name) => match self.operations.get(&name) {
                None => Err(TaskError::UnknownOperation { name }),
                Some(operation) => {
                    // Run the operation in its own task so a panic inside it
                    // becomes this task's failure instead of killing the
                    // batch and losing its finished event.
                    let operation = Arc::clone(operation);
                    let args = task.args;
                    match tokio::spawn(async move { operation.call(args).await }).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(source)) => Err(TaskError::OperationFailure { name, source }),
                        Err(join_error) => Err(TaskError::OperationFailure {
                            name,
                            source: join_failure_to_error(join_error),
                        }),
                    }
                }
            },
        }
    }
}

fn join_failure_to_error(join_error: tokio::task::JoinError) -> anyhow::Error {
    if join_error.is_panic() {
        let payload = join_error.into_panic();
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        anyhow::anyhow!("operation panicked: {}", message)
    } else {
        anyhow::anyhow!("operation task was cancelled before completing")
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn echo_worker() -> Worker {
        let mut worker = Worker::new();
        worker.register("echo", |args| async move { Ok(Value::Array(args)) });
        worker.register("fail", |_args| async move {
            Err(anyhow::anyhow!("boom"))
        });
        worker
    }

    fn batch_task(operation: Option<&str>, args: Vec<Value>) -> BatchTask {
        BatchTask {
            id: Uuid::new_v4(),
            operation: operation.map(str::to_string),
            args,
        }
    }

    #[test]
    fn test_registration() {
        let worker = echo_worker();
        assert!(worker.has_operation("echo"));
        assert!(!worker.has_operation("missing"));
        assert_eq!(worker.operation_count(), 2);
    }

    #[tokio::test]
    async fn test_run_emits_completion_per_task_then_batch_finished() {
        let worker = Arc::new(echo_worker());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let batch = vec![
            batch_task(Some("echo"), vec![json!(1)]),
            batch_task(None, vec![json!("a"), json!("b")]),
        ];
        let first_id = batch[0].id;
        worker.run(batch, tx).await;

        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { id, result } => {
                assert_eq!(id, first_id);
                assert_eq!(result.unwrap(), json!([1]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { result, .. } => {
                // Passthrough task: arguments delivered directly as the result.
                assert_eq!(result.unwrap(), json!(["a", "b"]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), WorkerEvent::BatchFinished));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_abort_batch() {
        let mut worker = echo_worker();
        worker.register("kaboom", |args| async move {
            if args.is_empty() {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let worker = Arc::new(worker);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let batch = vec![
            batch_task(Some("kaboom"), vec![]),
            batch_task(Some("echo"), vec![json!(7)]),
        ];
        worker.run(batch, tx).await;

        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { result, .. } => {
                let error = result.unwrap_err();
                assert_eq!(error.operation_name(), "kaboom");
                assert!(error.to_string().contains("panicked"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        // The rest of the batch still runs and the batch still finishes.
        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { result, .. } => {
                assert_eq!(result.unwrap(), json!([7]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), WorkerEvent::BatchFinished));
    }

    #[tokio::test]
    async fn test_failing_task_does_not_abort_batch() {
        let worker = Arc::new(echo_worker());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let batch = vec![
            batch_task(Some("fail"), vec![]),
            batch_task(Some("nope"), vec![]),
            batch_task(Some("echo"), vec![json!(42)]),
        ];
        worker.run(batch, tx).await;

        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { result, .. } => {
                let error = result.unwrap_err();
                assert!(matches!(error, TaskError::OperationFailure { .. }));
                assert_eq!(error.operation_name(), "fail");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { result, .. } => {
                assert!(matches!(
                    result.unwrap_err(),
                    TaskError::UnknownOperation { .. }
                ));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            WorkerEvent::TaskCompleted { result, .. } => {
                assert_eq!(result.unwrap(), json!([42]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), WorkerEvent::BatchFinished));
    }
}
