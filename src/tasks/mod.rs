//! Asynchronous analysis tasks.
//!
//! A task is created in `Running` state, driven to completion in the
//! background by the [`TaskExecutor`] and observed through the
//! [`TaskRegistry`] actor, which is the only owner of task state.

mod executor;
mod partitions;
pub mod payload;
mod registry;
mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::llm::FailureKind;
use crate::sinks::Operation;

pub use executor::TaskExecutor;
pub use partitions::RegistryPartitions;
pub use registry::{spawn_sweeper, spawn_task_registry, TaskRegistry};
pub use store::{AdvanceResult, TaskStore};

/// Opaque, globally unique task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh id carrying the kind prefix, e.g. `doc_3f2a...`
    #[must_use]
    pub fn generate(kind: TaskKind) -> Self {
        Self(format!("{}_{}", kind.id_prefix(), Uuid::new_v4().simple()))
    }

    /// Borrow the id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task analyzes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Text document summary
    Document,
    /// Image description
    Image,
}

impl TaskKind {
    const fn id_prefix(self) -> &'static str {
        match self {
            Self::Document => "doc",
            Self::Image => "img",
        }
    }

    /// Operation label used in error events
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::Document => Operation::DocumentAnalysis,
            Self::Image => Operation::ImageAnalysis,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Document => "document",
            Self::Image => "image",
        })
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Registered, execution not started
    Pending,
    /// Execution in progress
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// `Completed` and `Failed` admit no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal outcome handed to [`TaskRegistry::advance`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Analysis produced text
    Completed(String),
    /// Analysis failed
    Failed {
        /// Failure category
        kind: FailureKind,
        /// Human readable error
        message: String,
    },
}

/// Snapshot of a task record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// What is analyzed
    pub kind: TaskKind,
    /// Current status
    pub status: TaskStatus,
    /// User that submitted the task
    pub owner_user_id: String,
    /// Creation time; sweep ages are measured from here
    pub created_at: DateTime<Utc>,
    /// Analysis text, present iff `Completed`
    pub result: Option<String>,
    /// Error text, present iff `Failed`
    pub error_message: Option<String>,
    /// Failure category, present iff `Failed`
    pub failure_kind: Option<FailureKind>,
}

/// Errors returned by the task registry handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The task id is not registered (or was already swept)
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),
    /// The registry actor has shut down
    #[error("Task registry is closed")]
    Closed,
}
