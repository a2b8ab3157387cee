//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ai_relay::llm::{LlmError, LlmProvider, ProviderDescriptor, ProviderId, RequestSpec};
use ai_relay::sinks::{ErrorEvent, ErrorSink};
use ai_relay::tasks::payload::{Payload, PayloadError, PayloadLocator, PayloadResolver};
use async_trait::async_trait;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Provider replaying a fixed script of answers and recording every call
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Arc<Mutex<Vec<(ProviderId, String)>>>,
}

impl ScriptedProvider {
    pub fn new(
        script: impl IntoIterator<Item = Result<String, LlmError>>,
        calls: Arc<Mutex<Vec<(ProviderId, String)>>>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls,
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn invoke(
        &self,
        spec: &RequestSpec,
        descriptor: &ProviderDescriptor,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((descriptor.id, spec.full_prompt()));
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

/// Error sink keeping every event
#[derive(Default)]
pub struct CollectingSink {
    pub events: Mutex<Vec<ErrorEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ErrorEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl ErrorSink for CollectingSink {
    async fn report(&self, event: ErrorEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

/// Resolver serving the same bytes for every locator
pub struct StaticResolver(pub Result<Payload, PayloadError>);

#[async_trait]
impl PayloadResolver for StaticResolver {
    async fn resolve(&self, _locator: &PayloadLocator) -> Result<Payload, PayloadError> {
        self.0.clone()
    }
}
