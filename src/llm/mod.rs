//! LLM providers and client
//!
//! Provides the fixed set of AI backends (`ChatGPT`, Gemini, Grok), the request
//! value handed to them and a single capability trait every backend implements.

mod catalog;
pub(crate) mod http_utils;
/// Implementations of specific LLM providers
pub mod providers;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;
use crate::sinks::Operation;

pub use catalog::ProviderCatalog;

/// Reasons a single provider invocation can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    /// The provider could not be reached
    #[error("Transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status
    #[error("Provider rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Error text returned by the provider
        message: String,
    },
    /// The provider answered successfully but without usable text
    #[error("Provider returned an empty response")]
    EmptyResponse,
    /// The response body could not be parsed or had an unexpected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// The attempt did not finish within its deadline
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
    /// No client is configured for a catalog provider
    #[error("No client configured for provider {0}")]
    MissingConfig(ProviderId),
    /// A provider name that is not part of the catalog
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl LlmError {
    /// Taxonomy bucket of this failure
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::Rejected { .. } => FailureKind::ProviderRejected,
            Self::EmptyResponse => FailureKind::EmptyResponse,
            Self::MalformedResponse(_) => FailureKind::MalformedResponse,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::MissingConfig(_) | Self::UnknownProvider(_) => FailureKind::Configuration,
        }
    }
}

/// Flat failure taxonomy recorded on failed tasks and in error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or connection error reaching a provider
    Transport,
    /// Non-success status from a provider
    ProviderRejected,
    /// Success status without usable text
    EmptyResponse,
    /// Unparseable or unexpectedly shaped response body
    MalformedResponse,
    /// Per-attempt deadline exceeded
    Timeout,
    /// Provider missing from configuration
    Configuration,
    /// The source document or image could not be fetched or decoded
    PayloadResolution,
    /// Every provider and attempt of a dispatch failed
    AggregateFailure,
    /// A task id that is not (or no longer) registered
    UnknownTask,
}

impl FailureKind {
    /// Stable identifier used in logs and error events
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport_failure",
            Self::ProviderRejected => "provider_rejected",
            Self::EmptyResponse => "empty_response",
            Self::MalformedResponse => "malformed_response",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::PayloadResolution => "payload_resolution_failure",
            Self::AggregateFailure => "aggregate_failure",
            Self::UnknownTask => "unknown_task",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one of the supported AI backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// `OpenAI` `ChatGPT`
    ChatGpt,
    /// Google Gemini
    Gemini,
    /// xAI Grok
    Grok,
}

impl ProviderId {
    /// All providers in catalog order
    pub const ALL: [Self; 3] = [Self::ChatGpt, Self::Gemini, Self::Grok];

    /// Lowercase identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatGpt => "chatgpt",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chatgpt" | "openai" | "gpt" => Ok(Self::ChatGpt),
            "gemini" | "google" => Ok(Self::Gemini),
            "grok" | "xai" => Ok(Self::Grok),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// Immutable invocation parameters of one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    /// Provider identifier
    pub id: ProviderId,
    /// Human readable name
    pub display_name: &'static str,
    /// Emoji shown next to answers from this provider
    pub emoji: &'static str,
    /// Model requested from the backend
    pub model_name: String,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Endpoint the client talks to
    pub endpoint: String,
}

/// Image bytes sent along with a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Raw image bytes
    pub bytes: Arc<Vec<u8>>,
    /// MIME type, e.g. `image/jpeg`
    pub mime_type: String,
}

impl ImageAttachment {
    /// Wrap image bytes with their MIME type
    #[must_use]
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// Per-call request value, built by the caller and consumed by one dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// User prompt
    pub prompt: String,
    /// Optional text placed in front of the prompt
    pub style_directive: Option<String>,
    /// Provider to try first
    pub preferred_provider: Option<ProviderId>,
    /// Overrides the descriptor temperature
    pub temperature_override: Option<f32>,
    /// Image for multimodal analysis
    pub image: Option<ImageAttachment>,
    /// User on whose behalf the request runs (for error events)
    pub owner_user_id: String,
    /// Operation label (for error events)
    pub operation: Operation,
}

impl RequestSpec {
    /// Create a plain chat request
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            style_directive: None,
            preferred_provider: None,
            temperature_override: None,
            image: None,
            owner_user_id: "SYSTEM".to_string(),
            operation: Operation::Chat,
        }
    }

    /// Set the style directive
    #[must_use]
    pub fn with_style_directive(mut self, directive: impl Into<String>) -> Self {
        self.style_directive = Some(directive.into());
        self
    }

    /// Use the directive of a named chat style
    #[must_use]
    pub fn with_style(mut self, style: crate::styles::ChatStyle) -> Self {
        self.style_directive = style.directive().map(ToString::to_string);
        self
    }

    /// Set the preferred provider
    #[must_use]
    pub const fn with_preferred_provider(mut self, provider: ProviderId) -> Self {
        self.preferred_provider = Some(provider);
        self
    }

    /// Override the sampling temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature_override = Some(temperature);
        self
    }

    /// Attach an image
    #[must_use]
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Set owner and operation used for error reporting
    #[must_use]
    pub fn for_owner(mut self, owner_user_id: impl Into<String>, operation: Operation) -> Self {
        self.owner_user_id = owner_user_id.into();
        self.operation = operation;
        self
    }

    /// Prompt as sent to the backend.
    ///
    /// The style directive, when present and non-blank, is joined verbatim
    /// to the prompt by a blank line.
    #[must_use]
    pub fn full_prompt(&self) -> String {
        match self.style_directive.as_deref() {
            Some(directive) if !directive.trim().is_empty() => {
                format!("{directive}\n\n{}", self.prompt)
            }
            _ => self.prompt.clone(),
        }
    }

    /// Temperature for this request against `descriptor`
    #[must_use]
    pub fn temperature_for(&self, descriptor: &ProviderDescriptor) -> f32 {
        self.temperature_override.unwrap_or(descriptor.temperature)
    }
}

/// Interface for all LLM providers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform exactly one outbound call and return the response text.
    ///
    /// Retries are the caller's business.
    ///
    /// # Errors
    ///
    /// Returns the `LlmError` describing why this single attempt failed.
    async fn invoke(
        &self,
        spec: &RequestSpec,
        descriptor: &ProviderDescriptor,
    ) -> Result<String, LlmError>;
}

/// Provider clients keyed by provider id
#[derive(Clone, Default)]
pub struct ProviderSet {
    clients: HashMap<ProviderId, Arc<dyn LlmProvider>>,
}

impl ProviderSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create clients for every provider that has an API key
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut set = Self::new();
        if let Some(key) = settings.chatgpt_api_key.as_ref().filter(|k| !k.is_empty()) {
            set.register(
                ProviderId::ChatGpt,
                Arc::new(providers::ChatGptProvider::new(key.clone())),
            );
        }
        if let Some(key) = settings.gemini_api_key.as_ref().filter(|k| !k.is_empty()) {
            set.register(
                ProviderId::Gemini,
                Arc::new(providers::GeminiProvider::new(key.clone())),
            );
        }
        if let Some(key) = settings.grok_api_key.as_ref().filter(|k| !k.is_empty()) {
            set.register(
                ProviderId::Grok,
                Arc::new(providers::GrokProvider::new(key.clone())),
            );
        }
        set
    }

    /// Register or replace the client for `id`
    pub fn register(&mut self, id: ProviderId, provider: Arc<dyn LlmProvider>) {
        self.clients.insert(id, provider);
    }

    /// Builder-style variant of [`ProviderSet::register`]
    #[must_use]
    pub fn with_provider(mut self, id: ProviderId, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(id, provider);
        self
    }

    /// Returns true if a client is registered for `id`
    #[must_use]
    pub fn is_available(&self, id: ProviderId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Client for `id`
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingConfig` if no client is registered.
    pub fn get(&self, id: ProviderId) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.clients
            .get(&id)
            .cloned()
            .ok_or(LlmError::MissingConfig(id))
    }
}
