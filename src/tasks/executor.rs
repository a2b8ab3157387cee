//! Background execution of analysis tasks

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::payload::{PayloadError, PayloadLocator, PayloadResolver};
use super::registry::TaskRegistry;
use super::{AdvanceResult, RegistryError, TaskId, TaskKind, TaskOutcome};
use crate::config::{
    AnalysisRouting, ANALYSIS_TEMPERATURE, DOCUMENT_SUMMARY_PROMPT, IMAGE_ANALYSIS_PROMPT,
};
use crate::dispatch::Dispatcher;
use crate::llm::{FailureKind, ImageAttachment, ProviderId, RequestSpec};
use crate::sinks::{ErrorEvent, ErrorSink, NotifySink};

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Runs document and image analysis in the background.
///
/// `submit` returns as soon as the task is registered. The spawned job
/// resolves the payload, calls the routed provider and advances the task;
/// the notify sink hears about it once, after the terminal transition.
#[derive(Clone)]
pub struct TaskExecutor {
    registry: TaskRegistry,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<dyn PayloadResolver>,
    notifier: Arc<dyn NotifySink>,
    error_sink: Arc<dyn ErrorSink>,
    routing: AnalysisRouting,
}

impl TaskExecutor {
    /// Create an executor writing to `registry`
    #[must_use]
    pub fn new(
        registry: TaskRegistry,
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<dyn PayloadResolver>,
        notifier: Arc<dyn NotifySink>,
        error_sink: Arc<dyn ErrorSink>,
        routing: AnalysisRouting,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            resolver,
            notifier,
            error_sink,
            routing,
        }
    }

    /// Registry the executor writes to
    #[must_use]
    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Register a task and start it in the background.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` if the registry actor has stopped.
    pub async fn submit(
        &self,
        kind: TaskKind,
        owner_user_id: &str,
        locator: PayloadLocator,
    ) -> Result<TaskId, RegistryError> {
        let task_id = self.registry.create_task(kind, owner_user_id).await?;
        info!(task_id = %task_id, kind = %kind, owner = %owner_user_id, "Task submitted");

        let executor = self.clone();
        let id = task_id.clone();
        let owner = owner_user_id.to_string();
        tokio::spawn(async move {
            executor.run(id, kind, owner, locator).await;
        });

        Ok(task_id)
    }

    async fn run(&self, task_id: TaskId, kind: TaskKind, owner: String, locator: PayloadLocator) {
        let outcome = self.execute(kind, &owner, &locator).await;

        if let TaskOutcome::Failed { kind: failure, message } = &outcome {
            warn!(task_id = %task_id, kind = %failure, error = %message, "Task failed");
        }

        match self.registry.advance(&task_id, outcome).await {
            Ok(AdvanceResult::Applied(task)) => {
                debug!(task_id = %task_id, status = ?task.status, "Notifying task owner");
                self.notifier.notify(&owner, &task).await;
            }
            Ok(AdvanceResult::AlreadyTerminal(_) | AdvanceResult::Unknown) => {
                // Swept or finished elsewhere; the owner was not told by us
                debug!(task_id = %task_id, "Task outcome discarded");
            }
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to record task outcome"),
        }
    }

    async fn execute(&self, kind: TaskKind, owner: &str, locator: &PayloadLocator) -> TaskOutcome {
        let spec = match self.build_spec(kind, locator).await {
            Ok(spec) => spec.for_owner(owner, kind.operation()),
            Err(e) => {
                self.error_sink
                    .report(ErrorEvent::new(
                        owner,
                        kind.operation(),
                        FailureKind::PayloadResolution,
                        e.to_string(),
                    ))
                    .await;
                return TaskOutcome::Failed {
                    kind: FailureKind::PayloadResolution,
                    message: e.to_string(),
                };
            }
        };

        let provider = self.routed_provider(kind);
        let result = if self.routing.fallback {
            self.dispatcher
                .dispatch(&spec.with_preferred_provider(provider))
                .await
        } else {
            self.dispatcher.dispatch_single(provider, &spec).await
        };

        match result {
            Ok(outcome) => TaskOutcome::Completed(outcome.text),
            // The dispatcher already reported this failure
            Err(e) => TaskOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }

    const fn routed_provider(&self, kind: TaskKind) -> ProviderId {
        match kind {
            TaskKind::Document => self.routing.document,
            TaskKind::Image => self.routing.image,
        }
    }

    async fn build_spec(
        &self,
        kind: TaskKind,
        locator: &PayloadLocator,
    ) -> Result<RequestSpec, PayloadError> {
        let payload = self.resolver.resolve(locator).await?;

        match kind {
            TaskKind::Document => {
                let text = payload.into_text()?;
                Ok(
                    RequestSpec::new(format!("{DOCUMENT_SUMMARY_PROMPT}\n{text}"))
                        .with_temperature(ANALYSIS_TEMPERATURE),
                )
            }
            TaskKind::Image => {
                let mime_type = payload
                    .mime_type
                    .filter(|mime| mime.starts_with("image/"))
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                Ok(RequestSpec::new(IMAGE_ANALYSIS_PROMPT)
                    .with_image(ImageAttachment::new(payload.bytes, mime_type)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, TaskConfig};
    use crate::llm::{LlmError, MockLlmProvider, ProviderCatalog, ProviderSet};
    use crate::sinks::ChannelNotifier;
    use crate::tasks::payload::{MockPayloadResolver, Payload};
    use crate::tasks::{spawn_task_registry, TaskStatus};
    use crate::testing::{failing_provider, ok_provider, RecordingErrorSink};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct GatedResolver {
        gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
        payload: Payload,
    }

    #[async_trait::async_trait]
    impl PayloadResolver for GatedResolver {
        async fn resolve(&self, _locator: &PayloadLocator) -> Result<Payload, PayloadError> {
            if let Some(gate) = self.gate.lock().await.take() {
                let _ = gate.await;
            }
            Ok(self.payload.clone())
        }
    }

    fn text_payload(text: &str) -> Payload {
        Payload {
            bytes: text.as_bytes().to_vec(),
            mime_type: Some("text/plain".to_string()),
        }
    }

    fn dispatcher(providers: ProviderSet, sink: Arc<dyn ErrorSink>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            ProviderCatalog::default(),
            providers,
            DispatchConfig {
                retry_delay: Duration::from_millis(1),
                ..DispatchConfig::default()
            },
            sink,
        ))
    }

    #[tokio::test]
    async fn test_document_task_end_to_end() {
        let (gate_tx, gate_rx) = oneshot::channel();
        let resolver = GatedResolver {
            gate: tokio::sync::Mutex::new(Some(gate_rx)),
            payload: text_payload("quarterly report"),
        };

        let mut grok = MockLlmProvider::new();
        grok.expect_invoke()
            .withf(|spec, _| {
                spec.prompt == "Summarize this document:\nquarterly report"
                    && spec.temperature_override == Some(0.3)
            })
            .times(1)
            .returning(|_, _| Ok("Summary: revenue grew".to_string()));

        let sink = Arc::new(RecordingErrorSink::default());
        let (notifier, mut notifications) = ChannelNotifier::new();
        let executor = TaskExecutor::new(
            spawn_task_registry(&TaskConfig::default()),
            dispatcher(
                ProviderSet::new().with_provider(ProviderId::Grok, Arc::new(grok)),
                sink.clone(),
            ),
            Arc::new(resolver),
            Arc::new(notifier),
            sink.clone(),
            AnalysisRouting::default(),
        );

        let id = executor
            .submit(TaskKind::Document, "user1", PayloadLocator::new("X"))
            .await
            .expect("submit");
        let task = executor.registry().query(&id).await.expect("query");
        assert_eq!(task.status, TaskStatus::Running);
        assert!(notifications.try_recv().is_err());

        gate_tx.send(()).expect("open gate");
        let notification = notifications.recv().await.expect("notification");
        assert_eq!(notification.owner_user_id, "user1");
        assert_eq!(notification.task.result.as_deref(), Some("Summary: revenue grew"));

        let task = executor.registry().query(&id).await.expect("query");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task, notification.task);

        tokio::task::yield_now().await;
        assert!(notifications.try_recv().is_err());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_payload_failure_is_distinct() {
        let mut resolver = MockPayloadResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Err(PayloadError::Fetch("connection reset".to_string())));

        let mut provider = MockLlmProvider::new();
        provider.expect_invoke().never();

        let sink = Arc::new(RecordingErrorSink::default());
        let (notifier, mut notifications) = ChannelNotifier::new();
        let executor = TaskExecutor::new(
            spawn_task_registry(&TaskConfig::default()),
            dispatcher(
                ProviderSet::new().with_provider(ProviderId::Gemini, Arc::new(provider)),
                sink.clone(),
            ),
            Arc::new(resolver),
            Arc::new(notifier),
            sink.clone(),
            AnalysisRouting::default(),
        );

        executor
            .submit(TaskKind::Image, "user2", PayloadLocator::new("Y"))
            .await
            .expect("submit");

        let task = notifications.recv().await.expect("notification").task;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_kind, Some(FailureKind::PayloadResolution));
        assert!(task
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("connection reset")));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].failure_kind, FailureKind::PayloadResolution);
        assert_eq!(events[0].owner_user_id, "user2");
    }

    #[tokio::test]
    async fn test_invalid_utf8_document_fails_resolution() {
        let mut resolver = MockPayloadResolver::new();
        resolver.expect_resolve().returning(|_| {
            Ok(Payload {
                bytes: vec![0xc3, 0x28],
                mime_type: None,
            })
        });

        let sink = Arc::new(RecordingErrorSink::default());
        let (notifier, mut notifications) = ChannelNotifier::new();
        let executor = TaskExecutor::new(
            spawn_task_registry(&TaskConfig::default()),
            dispatcher(ProviderSet::new(), sink.clone()),
            Arc::new(resolver),
            Arc::new(notifier),
            sink,
            AnalysisRouting::default(),
        );

        executor
            .submit(TaskKind::Document, "u", PayloadLocator::new("Z"))
            .await
            .expect("submit");

        let task = notifications.recv().await.expect("notification").task;
        assert_eq!(task.failure_kind, Some(FailureKind::PayloadResolution));
    }

    #[tokio::test]
    async fn test_image_task_uses_routed_provider_only() {
        let mut resolver = MockPayloadResolver::new();
        resolver.expect_resolve().returning(|_| {
            Ok(Payload {
                bytes: vec![0xff, 0xd8],
                mime_type: None,
            })
        });

        let mut gemini = MockLlmProvider::new();
        gemini
            .expect_invoke()
            .withf(|spec, _| {
                spec.prompt == "Analyze this image in detail:"
                    && spec
                        .image
                        .as_ref()
                        .is_some_and(|image| image.mime_type == "image/jpeg")
            })
            .times(2)
            .returning(|_, _| Err(LlmError::EmptyResponse));

        let sink = Arc::new(RecordingErrorSink::default());
        let (notifier, mut notifications) = ChannelNotifier::new();
        let executor = TaskExecutor::new(
            spawn_task_registry(&TaskConfig::default()),
            dispatcher(
                ProviderSet::new()
                    .with_provider(ProviderId::Gemini, Arc::new(gemini))
                    .with_provider(ProviderId::ChatGpt, ok_provider("unused", 0)),
                sink.clone(),
            ),
            Arc::new(resolver),
            Arc::new(notifier),
            sink.clone(),
            AnalysisRouting::default(),
        );

        executor
            .submit(TaskKind::Image, "u", PayloadLocator::new("P"))
            .await
            .expect("submit");

        let task = notifications.recv().await.expect("notification").task;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_kind, Some(FailureKind::AggregateFailure));
        assert_eq!(
            task.error_message.as_deref(),
            Some("All AI models failed. Last error: Provider returned an empty response")
        );

        let events = sink.events();
        assert!(events
            .iter()
            .all(|e| e.operation == crate::sinks::Operation::ImageAnalysis));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_fallback_routing_uses_other_providers() {
        let mut resolver = MockPayloadResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(text_payload("notes")));

        let sink = Arc::new(RecordingErrorSink::default());
        let (notifier, mut notifications) = ChannelNotifier::new();
        let executor = TaskExecutor::new(
            spawn_task_registry(&TaskConfig::default()),
            dispatcher(
                ProviderSet::new()
                    .with_provider(ProviderId::Grok, failing_provider(LlmError::EmptyResponse, 2))
                    .with_provider(ProviderId::ChatGpt, ok_provider("Summary from ChatGPT", 1)),
                sink.clone(),
            ),
            Arc::new(resolver),
            Arc::new(notifier),
            sink,
            AnalysisRouting {
                fallback: true,
                ..AnalysisRouting::default()
            },
        );

        executor
            .submit(TaskKind::Document, "u", PayloadLocator::new("D"))
            .await
            .expect("submit");

        let task = notifications.recv().await.expect("notification").task;
        assert_eq!(task.result.as_deref(), Some("Summary from ChatGPT"));
    }

    #[tokio::test]
    async fn test_late_outcome_does_not_notify_again() {
        let mut resolver = MockPayloadResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(text_payload("doc")));

        let sink = Arc::new(RecordingErrorSink::default());
        let (notifier, mut notifications) = ChannelNotifier::new();
        let registry = spawn_task_registry(&TaskConfig::default());
        let executor = TaskExecutor::new(
            registry.clone(),
            dispatcher(
                ProviderSet::new().with_provider(ProviderId::Grok, ok_provider("done", 1)),
                sink.clone(),
            ),
            Arc::new(resolver),
            Arc::new(notifier),
            sink,
            AnalysisRouting::default(),
        );

        let id = executor
            .submit(TaskKind::Document, "u", PayloadLocator::new("D"))
            .await
            .expect("submit");
        let first = notifications.recv().await.expect("notification");
        assert_eq!(first.task.id, id);

        let late = registry
            .advance(&id, TaskOutcome::Completed("again".to_string()))
            .await
            .expect("advance");
        assert!(matches!(late, AdvanceResult::AlreadyTerminal(_)));

        drop(executor);
        tokio::task::yield_now().await;
        assert!(notifications.try_recv().is_err());
        assert_eq!(
            registry.query(&id).await.expect("query").result.as_deref(),
            Some("done")
        );
    }
}
