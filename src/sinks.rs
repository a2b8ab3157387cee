//! Side-effect boundaries
//!
//! The error sink receives one event per failed attempt or failed task; the
//! notify sink receives one snapshot per terminal task transition. Neither
//! can fail back into the dispatcher or the executor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ERROR_LOG_TTL_SECS;
use crate::llm::{FailureKind, ProviderId};
use crate::storage::{KeyValueStore, StorageError};
use crate::tasks::Task;

/// Key prefix of persisted error events
pub const ERROR_KEY_PREFIX: &str = "Error:";

/// What the failing call was doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Free-form chat request
    #[serde(rename = "ai-request")]
    Chat,
    /// Web search summary
    #[serde(rename = "search")]
    Search,
    /// Background document summary
    #[serde(rename = "process-document")]
    DocumentAnalysis,
    /// Background image analysis
    #[serde(rename = "process-image")]
    ImageAnalysis,
}

impl Operation {
    /// Stable label used in logs and persisted events
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "ai-request",
            Self::Search => "search",
            Self::DocumentAnalysis => "process-document",
            Self::ImageAnalysis => "process-image",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure, as reported to the error sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// User the failing call ran for (`SYSTEM` when unknown)
    pub owner_user_id: String,
    /// Operation label
    pub operation: Operation,
    /// Failure category
    pub failure_kind: FailureKind,
    /// Human readable failure description
    pub failure_reason: String,
    /// Provider of the failed attempt, if any
    pub provider: Option<ProviderId>,
    /// 1-based attempt number against `provider`
    pub attempt: Option<u32>,
    /// When the failure happened
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    /// Event stamped with the current time
    #[must_use]
    pub fn new(
        owner_user_id: impl Into<String>,
        operation: Operation,
        failure_kind: FailureKind,
        failure_reason: impl Into<String>,
    ) -> Self {
        Self {
            owner_user_id: owner_user_id.into(),
            operation,
            failure_kind,
            failure_reason: failure_reason.into(),
            provider: None,
            attempt: None,
            timestamp: Utc::now(),
        }
    }

    /// Tag the event with the provider it concerns
    #[must_use]
    pub const fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Tag the event with a provider attempt
    #[must_use]
    pub const fn with_attempt(mut self, provider: ProviderId, attempt: u32) -> Self {
        self.provider = Some(provider);
        self.attempt = Some(attempt);
        self
    }
}

/// Fire-and-forget error log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Record an event. Implementations swallow their own failures.
    async fn report(&self, event: ErrorEvent);
}

/// Error sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

#[async_trait]
impl ErrorSink for TracingErrorSink {
    async fn report(&self, event: ErrorEvent) {
        warn!(
            owner = %event.owner_user_id,
            operation = %event.operation,
            kind = %event.failure_kind,
            provider = ?event.provider,
            attempt = ?event.attempt,
            "{}",
            event.failure_reason
        );
    }
}

/// Error sink persisting events in a key-value store
pub struct KvErrorSink {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl KvErrorSink {
    /// Sink with the default 7 day retention
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, Duration::from_secs(ERROR_LOG_TTL_SECS))
    }

    /// Sink with a custom retention
    #[must_use]
    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key_for(event: &ErrorEvent) -> String {
        // Suffix keeps keys unique when two events share a timestamp
        format!(
            "{ERROR_KEY_PREFIX}{}:{}",
            event
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            Uuid::new_v4().simple()
        )
    }

    async fn persist(&self, event: &ErrorEvent) -> Result<(), StorageError> {
        let value = serde_json::to_string(event)?;
        self.store
            .put(&Self::key_for(event), value, Some(self.ttl))
            .await
    }

    /// The newest `limit` events, newest first.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store cannot be read or an entry is
    /// not a valid event.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ErrorEvent>, StorageError> {
        let keys = self.store.list(ERROR_KEY_PREFIX).await?;
        let mut events = Vec::with_capacity(limit.min(keys.len()));
        for key in keys.iter().rev().take(limit) {
            // Entries can expire between list and get
            if let Some(value) = self.store.get(key).await? {
                events.push(serde_json::from_str(&value)?);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl ErrorSink for KvErrorSink {
    async fn report(&self, event: ErrorEvent) {
        if let Err(e) = self.persist(&event).await {
            warn!(error = %e, operation = %event.operation, "Failed to persist error event");
        }
    }
}

/// Receives terminal task snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotifySink: Send + Sync {
    /// Called exactly once per task, after it became terminal
    async fn notify(&self, owner_user_id: &str, task: &Task);
}

/// Terminal task snapshot delivered by [`ChannelNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Task owner
    pub owner_user_id: String,
    /// Snapshot taken at the terminal transition
    pub task: Task,
}

/// Notify sink forwarding snapshots into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Create the sink and the receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotifySink for ChannelNotifier {
    async fn notify(&self, owner_user_id: &str, task: &Task) {
        let notification = Notification {
            owner_user_id: owner_user_id.to_string(),
            task: task.clone(),
        };
        if self.tx.send(notification).is_err() {
            debug!(task_id = %task.id, "Notification receiver dropped");
        }
    }
}
