//! Partitioned task registries
//!
//! One registry actor per partition key (e.g. per chat). Tasks of different
//! partitions never share a mailbox, and a lookup in the wrong partition is
//! indistinguishable from an unknown id.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::registry::{spawn_task_registry, TaskRegistry};
use super::{RegistryError, Task, TaskId};
use crate::config::TaskConfig;

/// Registry actors keyed by partition
pub struct RegistryPartitions<K: Hash + Eq + Clone + Send + Sync + Debug + 'static> {
    partitions: RwLock<HashMap<K, TaskRegistry>>,
    config: TaskConfig,
}

impl<K: Hash + Eq + Clone + Send + Sync + Debug + 'static> RegistryPartitions<K> {
    /// Create an empty set of partitions
    #[must_use]
    pub fn new(config: TaskConfig) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Registry for `key`, spawning its actor on first use
    pub async fn get_or_spawn(&self, key: &K) -> TaskRegistry {
        {
            let partitions = self.partitions.read().await;
            if let Some(registry) = partitions.get(key) {
                return registry.clone();
            }
        }

        let mut partitions = self.partitions.write().await;
        // Another caller may have won the race while we waited for the lock
        partitions
            .entry(key.clone())
            .or_insert_with(|| {
                info!(partition = ?key, "Spawning task registry partition");
                spawn_task_registry(&self.config)
            })
            .clone()
    }

    /// Registry for `key`, if one exists
    pub async fn get(&self, key: &K) -> Option<TaskRegistry> {
        self.partitions.read().await.get(key).cloned()
    }

    /// Snapshot of a task within one partition.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownTask` if the partition does not exist
    /// or does not hold the task.
    pub async fn query(&self, key: &K, task_id: &TaskId) -> Result<Task, RegistryError> {
        match self.get(key).await {
            Some(registry) => registry.query(task_id).await,
            None => Err(RegistryError::UnknownTask(task_id.clone())),
        }
    }

    /// Sweep every partition, returning the total number of removed tasks
    pub async fn sweep_all(&self, now: DateTime<Utc>) -> usize {
        let registries: Vec<(K, TaskRegistry)> = {
            let partitions = self.partitions.read().await;
            partitions
                .iter()
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect()
        };

        let mut removed = 0;
        for (key, registry) in registries {
            match registry.sweep(now).await {
                Ok(n) => removed += n,
                Err(e) => warn!(partition = ?key, error = %e, "Partition sweep failed"),
            }
        }
        removed
    }

    /// Number of partitions
    pub async fn len(&self) -> usize {
        self.partitions.read().await.len()
    }

    /// Returns true if no partition exists yet
    pub async fn is_empty(&self) -> bool {
        self.partitions.read().await.is_empty()
    }
}
