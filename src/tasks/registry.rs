//! Task registry actor
//!
//! A single Tokio task owns the [`TaskStore`]; every other component talks to
//! it through the cloneable [`TaskRegistry`] handle. Commands are processed in
//! arrival order, so every transition is atomic with respect to readers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::{AdvanceResult, TaskStore};
use super::{RegistryError, Task, TaskId, TaskKind, TaskOutcome};
use crate::config::TaskConfig;

enum RegistryCommand {
    Create {
        kind: TaskKind,
        owner_user_id: String,
        reply: oneshot::Sender<Task>,
    },
    Advance {
        task_id: TaskId,
        outcome: TaskOutcome,
        reply: oneshot::Sender<AdvanceResult>,
    },
    Query {
        task_id: TaskId,
        reply: oneshot::Sender<Option<Task>>,
    },
    Sweep {
        now: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the task registry actor
#[derive(Clone, Debug)]
pub struct TaskRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

impl std::fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { kind, .. } => write!(f, "Create({kind})"),
            Self::Advance { task_id, .. } => write!(f, "Advance({task_id})"),
            Self::Query { task_id, .. } => write!(f, "Query({task_id})"),
            Self::Sweep { now, .. } => write!(f, "Sweep({now})"),
            Self::Len { .. } => f.write_str("Len"),
        }
    }
}

/// Spawn the registry actor on the Tokio runtime.
///
/// The actor stops once every handle is dropped.
#[must_use]
pub fn spawn_task_registry(config: &TaskConfig) -> TaskRegistry {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    tokio::spawn(run_registry_loop(TaskStore::new(config), rx));
    TaskRegistry { tx }
}

async fn run_registry_loop(mut store: TaskStore, mut rx: mpsc::Receiver<RegistryCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            RegistryCommand::Create {
                kind,
                owner_user_id,
                reply,
            } => {
                let task = store.create(kind, &owner_user_id, Utc::now());
                debug!(task_id = %task.id, kind = %kind, owner = %owner_user_id, "Task created");
                let _ = reply.send(task);
            }
            RegistryCommand::Advance {
                task_id,
                outcome,
                reply,
            } => {
                let result = store.advance(&task_id, outcome);
                match &result {
                    AdvanceResult::Applied(task) => {
                        debug!(task_id = %task_id, status = ?task.status, "Task advanced");
                    }
                    AdvanceResult::AlreadyTerminal(task) => {
                        warn!(task_id = %task_id, status = ?task.status, "Ignoring transition of terminal task");
                    }
                    AdvanceResult::Unknown => {
                        warn!(task_id = %task_id, "Ignoring transition of unknown task");
                    }
                }
                let _ = reply.send(result);
            }
            RegistryCommand::Query { task_id, reply } => {
                let _ = reply.send(store.get(&task_id).cloned());
            }
            RegistryCommand::Sweep { now, reply } => {
                let removed = store.sweep(now);
                if removed > 0 {
                    info!(removed, remaining = store.len(), "Swept expired tasks");
                }
                let _ = reply.send(removed);
            }
            RegistryCommand::Len { reply } => {
                let _ = reply.send(store.len());
            }
        }
    }

    debug!("Task registry loop finished");
}

impl TaskRegistry {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Register a new task in `Running` state and return its id.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` if the actor has stopped.
    pub async fn create_task(
        &self,
        kind: TaskKind,
        owner_user_id: &str,
    ) -> Result<TaskId, RegistryError> {
        let owner_user_id = owner_user_id.to_string();
        let task = self
            .request(|reply| RegistryCommand::Create {
                kind,
                owner_user_id,
                reply,
            })
            .await?;
        Ok(task.id)
    }

    /// Move a task into its terminal state.
    ///
    /// Only an `Applied` result means this call performed the transition.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` if the actor has stopped.
    pub async fn advance(
        &self,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Result<AdvanceResult, RegistryError> {
        let task_id = task_id.clone();
        self.request(|reply| RegistryCommand::Advance {
            task_id,
            outcome,
            reply,
        })
        .await
    }

    /// Snapshot of a task.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownTask` if the id was never registered or
    /// has been swept, `RegistryError::Closed` if the actor has stopped.
    pub async fn query(&self, task_id: &TaskId) -> Result<Task, RegistryError> {
        let id = task_id.clone();
        self.request(|reply| RegistryCommand::Query { task_id: id, reply })
            .await?
            .ok_or_else(|| RegistryError::UnknownTask(task_id.clone()))
    }

    /// Remove expired terminal tasks relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` if the actor has stopped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, RegistryError> {
        self.request(|reply| RegistryCommand::Sweep { now, reply })
            .await
    }

    /// Number of stored tasks.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` if the actor has stopped.
    pub async fn len(&self) -> Result<usize, RegistryError> {
        self.request(|reply| RegistryCommand::Len { reply }).await
    }
}

/// Spawn a background sweeper that runs every `interval` until `shutdown` is
/// cancelled or the registry closes.
pub fn spawn_sweeper(
    registry: TaskRegistry,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Task sweeper cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = registry.sweep(Utc::now()).await {
                        warn!(error = %e, "Task sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}
