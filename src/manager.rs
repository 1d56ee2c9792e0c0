//! Task manager: single point of task submission with at most one
//! concurrent batch and automatic draining of work submitted mid-batch.
//!
//! The manager is an actor: a single dispatcher loop owns the three task
//! collections (queued, pending, running) and is the only code that mutates
//! them. Foreground commands and worker events arrive as messages, so no
//! locking is needed and completion handling always happens on the same
//! context that owns the collections.
//!
//! # Collections
//!
//! * `queued` - tasks submitted since the last dispatch, not yet running
//! * `pending` - tasks submitted while a batch was executing; promoted to
//!   `queued` and re-dispatched automatically once the batch finishes
//! * `running` - the fixed set of tasks handed to the current batch
//!
//! A task lives in exactly one collection until its result is delivered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::TaskManagerConfig;
use crate::task::{Task, TaskCallback, TaskId, TaskResult};
use crate::worker::{BatchTask, Worker, WorkerEvent};

/// Events emitted by the manager to its subscriber.
///
/// Each fires exactly once per external [`TaskManager::run_tasks`] call that
/// starts work, no matter how many chained batches were needed to drain the
/// backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    RunTasksStarted,
    RunTasksFinished,
}

/// Sizes of the manager's three task collections at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    pub queued: usize,
    pub pending: usize,
    pub running: usize,
    /// Whether a batch is executing. Stays `true` between the last task's
    /// completion and the batch's finished event, when `running` is already
    /// empty.
    pub batch_running: bool,
}

impl QueueCounts {
    /// Total number of outstanding tasks.
    pub fn total(&self) -> usize {
        self.queued + self.pending + self.running
    }
}

enum Command {
    AddTask(Task),
    RunTasks,
    CancelTask {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    QueueCounts {
        reply: oneshot::Sender<QueueCounts>,
    },
}

/// Handle to a running task manager.
///
/// `add_task` and `run_tasks` never block: they post a message to the
/// dispatcher loop and return immediately. Dropping the handle (or calling
/// [`shutdown`](TaskManager::shutdown)) lets the dispatcher finish the
/// in-flight drain and stop.
pub struct TaskManager {
    commands: mpsc::UnboundedSender<Command>,
    dispatcher: JoinHandle<()>,
}

impl TaskManager {
    /// Create a manager around `worker` with the default configuration.
    ///
    /// Returns the handle plus the receiver for [`ManagerEvent`]s.
    pub fn new(worker: Worker) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        Self::spawn(worker, TaskManagerConfig::default())
    }

    /// Create a manager with an explicit configuration.
    pub fn with_config(
        worker: Worker,
        config: TaskManagerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ManagerEvent>)> {
        config.validate()?;
        Ok(Self::spawn(worker, config))
    }

    fn spawn(
        worker: Worker,
        config: TaskManagerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (worker_event_tx, worker_event_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            worker: Arc::new(worker),
            config,
            queued: VecDeque::new(),
            pending: VecDeque::new(),
            running: VecDeque::new(),
            batch_running: false,
            drain_active: false,
            batch_started_at: None,
            events: event_tx,
            worker_events: worker_event_tx,
        };
        let handle = tokio::spawn(dispatcher.run(command_rx, worker_event_rx));

        (
            Self {
                commands: command_tx,
                dispatcher: handle,
            },
            event_rx,
        )
    }

    /// Submit a task and return its freshly generated id immediately.
    ///
    /// The task is appended to `queued`, or to `pending` if a batch is
    /// currently executing. Pass `operation: None` to have the arguments
    /// delivered directly to the callback as the result; pass
    /// `callback: None` for fire-and-forget tasks.
    pub fn add_task(
        &self,
        operation: Option<&str>,
        callback: Option<TaskCallback>,
        args: Vec<Value>,
    ) -> TaskId {
        let task = Task::new(operation.map(str::to_string), callback, args);
        let id = task.id;
        if self.commands.send(Command::AddTask(task)).is_err() {
            warn!("add_task: dispatcher is no longer running, task {} dropped", id);
        }
        id
    }

    /// Ask the manager to execute the queued tasks.
    ///
    /// No-op when a batch is already running (queued work is picked up
    /// automatically once it finishes) or when nothing is queued.
    pub fn run_tasks(&self) {
        if self.commands.send(Command::RunTasks).is_err() {
            warn!("run_tasks: dispatcher is no longer running");
        }
    }

    /// Remove a task from `queued` or `pending` before it starts.
    ///
    /// Returns `true` if the task was found and removed. Tasks that are
    /// already running execute to completion and cannot be cancelled.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::CancelTask { id, reply })
            .map_err(|_| anyhow!("dispatcher is no longer running"))?;
        rx.await.context("dispatcher dropped cancel reply")
    }

    /// Current sizes of the queued/pending/running collections.
    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::QueueCounts { reply })
            .map_err(|_| anyhow!("dispatcher is no longer running"))?;
        rx.await.context("dispatcher dropped counts reply")
    }

    /// Whether a batch is currently executing.
    ///
    /// Reflects the dispatcher's state machine, so it stays `true` until the
    /// batch's finished event is processed even if every task in it has
    /// already completed.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.queue_counts().await?.batch_running)
    }

    /// Stop accepting new work and wait for the dispatcher to finish.
    ///
    /// Tasks already dispatched (including pending work that auto-chains)
    /// run to completion; tasks still in `queued` that were never dispatched
    /// are dropped with a warning.
    pub async fn shutdown(self) {
        info!("shutting down task manager");
        let TaskManager {
            commands,
            dispatcher,
        } = self;
        drop(commands);
        if let Err(e) = dispatcher.await {
            error!("task dispatcher terminated abnormally: {}", e);
        }
    }
}

/// A running task's bookkeeping entry: the callback stays with the dispatcher
/// while the worker executes the task body.
struct RunningTask {
    id: TaskId,
    operation: Option<String>,
    callback: Option<TaskCallback>,
}

struct Dispatcher {
    worker: Arc<Worker>,
    config: TaskManagerConfig,
    queued: VecDeque<Task>,
    pending: VecDeque<Task>,
    running: VecDeque<RunningTask>,
    /// A batch is executing on the background context.
    batch_running: bool,
    /// An external run_tasks call started a drain that has not finished yet.
    drain_active: bool,
    batch_started_at: Option<Instant>,
    events: mpsc::UnboundedSender<ManagerEvent>,
    worker_events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        debug!("task dispatcher started");
        let mut closed = false;
        loop {
            if closed && !self.batch_running {
                break;
            }
            tokio::select! {
                event = worker_events.recv() => {
                    if let Some(event) = event {
                        self.handle_worker_event(event);
                    }
                }
                command = commands.recv(), if !closed => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => closed = true,
                    }
                }
            }
        }
        if !self.queued.is_empty() || !self.pending.is_empty() {
            warn!(
                "task dispatcher stopping with {} queued and {} pending task(s) never dispatched",
                self.queued.len(),
                self.pending.len()
            );
        }
        debug!("task dispatcher stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddTask(task) => self.add_task(task),
            Command::RunTasks => self.run_tasks(true),
            Command::CancelTask { id, reply } => {
                let _ = reply.send(self.cancel_task(id));
            }
            Command::QueueCounts { reply } => {
                let _ = reply.send(QueueCounts {
                    queued: self.queued.len(),
                    pending: self.pending.len(),
                    running: self.running.len(),
                    batch_running: self.batch_running,
                });
            }
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::TaskCompleted { id, result } => self.task_completed(id, result),
            WorkerEvent::BatchFinished => self.batch_finished(),
        }
    }

    fn add_task(&mut self, task: Task) {
        if self.batch_running {
            debug!("task {} enqueued as pending (batch in flight)", task.id);
            self.pending.push_back(task);
        } else {
            debug!("task {} enqueued", task.id);
            self.queued.push_back(task);
        }
    }

    /// Move all queued tasks into the running set and start a batch.
    ///
    /// `external` marks a caller-initiated run (as opposed to auto-chaining),
    /// which is what gets the exactly-once started/finished signals.
    fn run_tasks(&mut self, external: bool) {
        if self.batch_running {
            debug!("run_tasks ignored: a batch is already running");
            return;
        }
        if self.queued.is_empty() {
            debug!("run_tasks ignored: no queued tasks");
            return;
        }

        if external && !self.drain_active {
            self.drain_active = true;
            let _ = self.events.send(ManagerEvent::RunTasksStarted);
        }

        let mut batch = Vec::with_capacity(self.queued.len());
        for task in self.queued.drain(..) {
            let Task {
                id,
                operation,
                args,
                callback,
            } = task;
            batch.push(BatchTask {
                id,
                operation: operation.clone(),
                args,
            });
            self.running.push_back(RunningTask {
                id,
                operation,
                callback,
            });
        }

        info!("dispatching batch of {} task(s)", batch.len());
        self.batch_running = true;
        self.batch_started_at = Some(Instant::now());

        // Fresh background context per batch; it terminates with the batch.
        let worker = Arc::clone(&self.worker);
        let events = self.worker_events.clone();
        tokio::spawn(worker.run(batch, events));
    }

    fn task_completed(&mut self, id: TaskId, result: TaskResult) {
        let Some(position) = self.running.iter().position(|task| task.id == id) else {
            warn!("completion event for unknown task {}", id);
            return;
        };
        let Some(task) = self.running.remove(position) else {
            return;
        };

        match &result {
            Ok(value) => {
                if self.config.log_task_results {
                    debug!(
                        "task {} ({}) completed: {}",
                        id,
                        task.operation.as_deref().unwrap_or("<passthrough>"),
                        value
                    );
                }
            }
            Err(e) => {
                if task.callback.is_some() {
                    warn!("task {} failed: {}", id, e);
                } else {
                    // Fire-and-forget failures would otherwise vanish.
                    error!("task {} failed with no callback attached: {}", id, e);
                }
            }
        }

        if let Some(callback) = task.callback {
            callback(result);
        }
    }

    fn batch_finished(&mut self) {
        self.batch_running = false;

        if let Some(started) = self.batch_started_at.take() {
            let elapsed = started.elapsed();
            let threshold = self.config.long_task_warning_secs;
            if threshold > 0 && elapsed >= Duration::from_secs(threshold) {
                warn!("batch took {:.1}s to complete", elapsed.as_secs_f64());
            } else {
                debug!("batch completed in {:?}", elapsed);
            }
        }

        if !self.running.is_empty() {
            warn!(
                "batch finished with {} task(s) missing completion events",
                self.running.len()
            );
            self.running.clear();
        }

        if !self.pending.is_empty() {
            // Auto-chaining: promote pending work and dispatch again without
            // an external run_tasks call.
            debug!("promoting {} pending task(s)", self.pending.len());
            self.queued.append(&mut self.pending);
            self.run_tasks(false);
        } else if self.drain_active {
            self.drain_active = false;
            info!("all queued tasks drained");
            let _ = self.events.send(ManagerEvent::RunTasksFinished);
        }
    }

    fn cancel_task(&mut self, id: TaskId) -> bool {
        if let Some(position) = self.queued.iter().position(|task| task.id == id) {
            self.queued.remove(position);
            debug!("task {} cancelled while queued", id);
            return true;
        }
        if let Some(position) = self.pending.iter().position(|task| task.id == id) {
            self.pending.remove(position);
            debug!("task {} cancelled while pending", id);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dispatcher() -> (
        Dispatcher,
        mpsc::UnboundedReceiver<ManagerEvent>,
        mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (worker_event_tx, worker_event_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            worker: Arc::new(Worker::new()),
            config: TaskManagerConfig::default(),
            queued: VecDeque::new(),
            pending: VecDeque::new(),
            running: VecDeque::new(),
            batch_running: false,
            drain_active: false,
            batch_started_at: None,
            events: event_tx,
            worker_events: worker_event_tx,
        };
        (dispatcher, event_rx, worker_event_rx)
    }

    #[tokio::test]
    async fn test_batch_running_outlives_last_task_completion() {
        let (mut dispatcher, mut events, _worker_events) = test_dispatcher();

        let task = Task::new(None, None, vec![]);
        let id = task.id;
        dispatcher.add_task(task);
        dispatcher.run_tasks(true);
        assert!(dispatcher.batch_running);

        // The last completion empties `running`, but the batch is still
        // executing until its finished event is processed.
        dispatcher.task_completed(id, Ok(Value::Null));
        assert!(dispatcher.running.is_empty());
        assert!(dispatcher.batch_running);

        dispatcher.batch_finished();
        assert!(!dispatcher.batch_running);

        assert_eq!(events.try_recv().unwrap(), ManagerEvent::RunTasksStarted);
        assert_eq!(events.try_recv().unwrap(), ManagerEvent::RunTasksFinished);
        assert!(events.try_recv().is_err());
    }
}
