//! Storage layer
//!
//! Generic key-value boundary used by the persistent error log. Persistence
//! mechanics live behind the trait; `MemoryKvStore` is the in-process
//! implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Minimal key-value store with per-entry expiry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), StorageError>;
    /// Value stored under `key`, unless missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    /// Live keys starting with `prefix`, in ascending order
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory `KeyValueStore`
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryKvStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // Expired entries are dropped opportunistically on write
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() -> Result<(), StorageError> {
        let store = MemoryKvStore::new();
        store.put("a", "1".to_string(), None).await?;
        assert_eq!(store.get("a").await?, Some("1".to_string()));
        assert_eq!(store.get("b").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() -> Result<(), StorageError> {
        let store = MemoryKvStore::new();
        store
            .put("Error:1", "x".to_string(), Some(Duration::from_secs(10)))
            .await?;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("Error:1").await?, None);
        assert!(store.list("Error:").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() -> Result<(), StorageError> {
        let store = MemoryKvStore::new();
        store.put("Error:2", "b".to_string(), None).await?;
        store.put("Error:1", "a".to_string(), None).await?;
        store.put("Quota:1", "q".to_string(), None).await?;
        assert_eq!(store.list("Error:").await?, vec!["Error:1", "Error:2"]);
        Ok(())
    }
}
