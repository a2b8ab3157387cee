//! Fallback dispatcher
//!
//! Tries providers in a deterministic order, retrying each a bounded number
//! of times with a fixed delay, and returns the first successful answer.
//! Attempts are strictly sequential; the delay only suspends the dispatch
//! that is waiting.

mod search_cache;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info, instrument, warn};

use crate::config::{
    DispatchConfig, ANALYSIS_TEMPERATURE, SEARCH_CACHE_MAX_ENTRIES, SEARCH_CACHE_TTL_SECS,
};
use crate::llm::{
    FailureKind, LlmError, ProviderCatalog, ProviderDescriptor, ProviderId, ProviderSet,
    RequestSpec,
};
use crate::sinks::{ErrorEvent, ErrorSink, Operation};

pub use search_cache::SearchCache;

/// Successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Response text, never empty
    pub text: String,
    /// Provider that produced it
    pub provider: ProviderId,
}

/// A dispatch that produced no answer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Every provider in the attempt order failed
    #[error("All AI models failed. Last error: {last}")]
    Exhausted {
        /// Attempts made across all providers
        attempts: u32,
        /// Most recent failure
        last: LlmError,
    },
    /// The catalog is empty
    #[error("No AI providers are configured")]
    NoProviders,
}

impl DispatchError {
    /// Failure category recorded on failed tasks
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Exhausted { .. } => FailureKind::AggregateFailure,
            Self::NoProviders => FailureKind::Configuration,
        }
    }

    /// Most recent provider failure, if any attempt was made
    #[must_use]
    pub const fn last_error(&self) -> Option<&LlmError> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::NoProviders => None,
        }
    }
}

/// Ordered multi-provider dispatcher
pub struct Dispatcher {
    catalog: ProviderCatalog,
    providers: ProviderSet,
    config: DispatchConfig,
    error_sink: Arc<dyn ErrorSink>,
    search_cache: SearchCache,
    default_provider: Option<ProviderId>,
}

impl Dispatcher {
    /// Create a dispatcher over `catalog` using the clients in `providers`
    #[must_use]
    pub fn new(
        catalog: ProviderCatalog,
        providers: ProviderSet,
        config: DispatchConfig,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            catalog,
            providers,
            config,
            error_sink,
            search_cache: SearchCache::new(
                Duration::from_secs(SEARCH_CACHE_TTL_SECS),
                SEARCH_CACHE_MAX_ENTRIES,
            ),
            default_provider: None,
        }
    }

    /// Provider tried first when a request names none
    #[must_use]
    pub const fn with_default_provider(mut self, provider: Option<ProviderId>) -> Self {
        self.default_provider = provider;
        self
    }

    /// Replace the search cache
    #[must_use]
    pub fn with_search_cache(mut self, cache: SearchCache) -> Self {
        self.search_cache = cache;
        self
    }

    /// Provider catalog
    #[must_use]
    pub const fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Attempt order for a request.
    ///
    /// The preferred provider comes first if it is in the catalog, followed
    /// by every other provider in catalog order. Each id appears once.
    #[must_use]
    pub fn attempt_order(&self, preferred: Option<ProviderId>) -> Vec<ProviderId> {
        let preferred = preferred.filter(|id| self.catalog.get(*id).is_some());
        preferred
            .into_iter()
            .chain(self.catalog.ids().filter(|id| Some(*id) != preferred))
            .collect()
    }

    /// Dispatch with fallback across the whole catalog.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Exhausted` carrying the last failure when
    /// every provider failed, `DispatchError::NoProviders` if the catalog is
    /// empty.
    #[instrument(skip(self, spec), fields(operation = %spec.operation, owner = %spec.owner_user_id))]
    pub async fn dispatch(&self, spec: &RequestSpec) -> Result<DispatchOutcome, DispatchError> {
        let order = self.attempt_order(spec.preferred_provider.or(self.default_provider));
        debug!(order = ?order, "Dispatching request");

        let mut attempts = 0;
        let mut last_error = None;
        // Skipped providers only count when nothing was attempted at all
        let mut last_skipped = None;

        for id in order {
            let Some(descriptor) = self.catalog.get(id) else {
                continue;
            };

            let (result, made) = self.run_provider(descriptor, spec).await;
            attempts += made;
            match result {
                Ok(text) => {
                    info!(provider = %id, attempts, "Dispatch succeeded");
                    return Ok(DispatchOutcome { text, provider: id });
                }
                Err(e) if made > 0 => last_error = Some(e),
                Err(e) => last_skipped = Some(e),
            }
        }

        let Some(last) = last_error.or(last_skipped) else {
            return Err(DispatchError::NoProviders);
        };
        Err(self.exhausted(spec, attempts, last).await)
    }

    /// Dispatch against a single provider, retrying it but never falling
    /// back to another one.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Exhausted` when the provider failed every
    /// attempt or is not part of the catalog.
    #[instrument(skip(self, spec), fields(operation = %spec.operation, owner = %spec.owner_user_id))]
    pub async fn dispatch_single(
        &self,
        provider: ProviderId,
        spec: &RequestSpec,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(descriptor) = self.catalog.get(provider) else {
            let last = LlmError::UnknownProvider(provider.to_string());
            return Err(self.exhausted(spec, 0, last).await);
        };

        match self.run_provider(descriptor, spec).await {
            (Ok(text), _) => Ok(DispatchOutcome { text, provider }),
            (Err(last), attempts) => Err(self.exhausted(spec, attempts, last).await),
        }
    }

    /// Summarize web results for `query`, preferring Grok.
    ///
    /// Successful answers are cached by normalized query.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::dispatch`].
    pub async fn search(
        &self,
        query: &str,
        owner_user_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        if let Some(cached) = self.search_cache.get(query).await {
            return Ok(cached);
        }

        let spec = RequestSpec::new(format!(
            "Search the web for: {}\nProvide a comprehensive but concise summary of the results.",
            query.trim()
        ))
        .with_preferred_provider(ProviderId::Grok)
        .with_temperature(ANALYSIS_TEMPERATURE)
        .for_owner(owner_user_id, Operation::Search);

        let outcome = self.dispatch(&spec).await?;
        self.search_cache.insert(query, outcome.clone()).await;
        Ok(outcome)
    }

    /// Run the retry loop against one provider.
    ///
    /// Returns the result and the number of attempts made. A provider
    /// without a client fails immediately with `MissingConfig`.
    async fn run_provider(
        &self,
        descriptor: &ProviderDescriptor,
        spec: &RequestSpec,
    ) -> (Result<String, LlmError>, u32) {
        let client = match self.providers.get(descriptor.id) {
            Ok(client) => client,
            Err(e) => {
                warn!(provider = %descriptor.id, "Skipping provider without client");
                let event = Self::event(spec, e.kind(), &e).with_provider(descriptor.id);
                self.error_sink.report(event).await;
                return (Err(e), 0);
            }
        };

        let max_attempts = self.config.max_retries.max(1);
        let strategy =
            FixedInterval::new(self.config.retry_delay).take((max_attempts - 1) as usize);
        let attempt_timeout = self.config.attempt_timeout;

        let counter = AtomicU32::new(0);
        let counter = &counter;
        let client = &client;

        let result = Retry::spawn(strategy, move || async move {
            let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
            let started = Instant::now();

            let result = tokio::time::timeout(attempt_timeout, client.invoke(spec, descriptor))
                .await
                .unwrap_or(Err(LlmError::Timeout(attempt_timeout)));

            match &result {
                Ok(_) => debug!(
                    provider = %descriptor.id,
                    attempt,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Provider attempt succeeded"
                ),
                Err(e) => {
                    warn!(
                        provider = %descriptor.id,
                        attempt,
                        max_attempts,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Provider attempt failed"
                    );
                    let event =
                        Self::event(spec, e.kind(), e).with_attempt(descriptor.id, attempt);
                    self.error_sink.report(event).await;
                }
            }
            result
        })
        .await;

        (result, counter.load(Ordering::Relaxed))
    }

    async fn exhausted(&self, spec: &RequestSpec, attempts: u32, last: LlmError) -> DispatchError {
        let error = DispatchError::Exhausted { attempts, last };
        warn!(attempts, error = %error, "Dispatch exhausted");
        let event = Self::event(spec, error.kind(), &error);
        self.error_sink.report(event).await;
        error
    }

    fn event(spec: &RequestSpec, kind: FailureKind, reason: &dyn std::error::Error) -> ErrorEvent {
        ErrorEvent::new(
            spec.owner_user_id.clone(),
            spec.operation,
            kind,
            reason.to_string(),
        )
    }
}
