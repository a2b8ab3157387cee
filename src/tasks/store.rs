//! Task records and their state machine.
//!
//! `TaskStore` is plain data with synchronous operations and an explicit
//! clock; the registry actor is its only owner at runtime.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Task, TaskId, TaskKind, TaskOutcome, TaskStatus};
use crate::config::TaskConfig;

/// Result of an `advance` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceResult {
    /// The task moved into a terminal state; carries the new snapshot
    Applied(Task),
    /// The task was already terminal and is unchanged
    AlreadyTerminal(Task),
    /// No task with this id
    Unknown,
}

/// Map of task records keyed by id
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    completed_ttl: Duration,
    failed_ttl: Duration,
}

impl TaskStore {
    /// Create an empty store with the lifetimes from `config`
    #[must_use]
    pub fn new(config: &TaskConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            completed_ttl: config.completed_ttl,
            failed_ttl: config.failed_ttl,
        }
    }

    /// Register a new task.
    ///
    /// Creation implies execution is about to start, so the record passes
    /// through `Pending` straight into `Running`.
    pub fn create(&mut self, kind: TaskKind, owner_user_id: &str, now: DateTime<Utc>) -> Task {
        let mut task = Task {
            id: TaskId::generate(kind),
            kind,
            status: TaskStatus::Pending,
            owner_user_id: owner_user_id.to_string(),
            created_at: now,
            result: None,
            error_message: None,
            failure_kind: None,
        };
        task.status = TaskStatus::Running;

        self.tasks.insert(task.id.clone(), task.clone());
        task
    }

    /// Move a running task into its terminal state.
    ///
    /// Terminal tasks are never overwritten.
    pub fn advance(&mut self, task_id: &TaskId, outcome: TaskOutcome) -> AdvanceResult {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return AdvanceResult::Unknown;
        };

        if task.status.is_terminal() {
            return AdvanceResult::AlreadyTerminal(task.clone());
        }

        match outcome {
            TaskOutcome::Completed(text) => {
                task.status = TaskStatus::Completed;
                task.result = Some(text);
            }
            TaskOutcome::Failed { kind, message } => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(message);
                task.failure_kind = Some(kind);
            }
        }

        AdvanceResult::Applied(task.clone())
    }

    /// Snapshot of a task
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Remove aged terminal tasks and return how many were removed.
    ///
    /// Age is `now - created_at`. Completed tasks go after `completed_ttl`,
    /// failed ones after `failed_ttl`; running tasks are kept.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        let (completed_ttl, failed_ttl) = (self.completed_ttl, self.failed_ttl);

        self.tasks.retain(|_, task| {
            // A creation time in the future counts as age zero
            let age = (now - task.created_at).to_std().unwrap_or(Duration::ZERO);
            match task.status {
                TaskStatus::Completed => age <= completed_ttl,
                TaskStatus::Failed => age <= failed_ttl,
                TaskStatus::Pending | TaskStatus::Running => true,
            }
        });

        before - self.tasks.len()
    }

    /// Number of stored tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no task is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids of all stored tasks, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }
}
