//! Shared test helpers

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{LlmError, LlmProvider, MockLlmProvider};
use crate::sinks::{ErrorEvent, ErrorSink};

/// Provider answering `text` exactly `times` times
pub fn ok_provider(text: &str, times: usize) -> Arc<dyn LlmProvider> {
    let text = text.to_string();
    let mut mock = MockLlmProvider::new();
    mock.expect_invoke()
        .times(times)
        .returning(move |_, _| Ok(text.clone()));
    Arc::new(mock)
}

/// Provider failing with `error` exactly `times` times
pub fn failing_provider(error: LlmError, times: usize) -> Arc<dyn LlmProvider> {
    let mut mock = MockLlmProvider::new();
    mock.expect_invoke()
        .times(times)
        .returning(move |_, _| Err(error.clone()));
    Arc::new(mock)
}

/// Error sink keeping every event in memory
#[derive(Default)]
pub struct RecordingErrorSink {
    events: Mutex<Vec<ErrorEvent>>,
}

impl RecordingErrorSink {
    pub fn events(&self) -> Vec<ErrorEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl ErrorSink for RecordingErrorSink {
    async fn report(&self, event: ErrorEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}
