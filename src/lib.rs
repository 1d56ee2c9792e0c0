//! Taskman - background task queueing and dispatch for interactive
//! applications
//!
//! This library lets an application hand named operations to a background
//! execution context without blocking its foreground loop. A [`Worker`]
//! holds the operation registry and executes batches sequentially; a
//! [`TaskManager`] owns the task collections, guarantees at most one batch
//! runs at a time, and automatically drains work submitted while a batch is
//! in flight. Results come back through per-task callbacks invoked on the
//! manager's dispatcher context.
//!
//! # Modules
//!
//! The library is organized into several key modules:
//!
//! * [`config`] - Task manager configuration
//! * [`error`] - Typed task execution errors
//! * [`fileio`] - Atomic save-file management
//! * [`logger`] - Optional fern-based logging setup
//! * [`manager`] - Task manager and dispatcher loop
//! * [`task`] - Task model and callback types
//! * [`worker`] - Operation registry and batch executor

/// Task manager configuration
pub mod config;

/// Library constants and default values
pub mod constants;

/// Typed errors produced while executing tasks
pub mod error;

/// Save-file management with atomic writes and recovery
pub mod fileio;

/// Optional logging setup built on fern
pub mod logger;

/// Task manager: submission, dispatch, and auto-draining
pub mod manager;

/// Task model and callback types
pub mod task;

/// Worker: operation registry and sequential batch execution
pub mod worker;

// Re-export the core types for convenient access
pub use config::TaskManagerConfig;
pub use error::TaskError;
pub use fileio::{NameFilter, SaveManager};
pub use manager::{ManagerEvent, QueueCounts, TaskManager};
pub use task::{Task, TaskCallback, TaskId, TaskResult};
pub use worker::{Operation, Worker};
