//! Static catalog of provider descriptors.
//!
//! Enumeration order is the default fallback order.

use super::{ProviderDescriptor, ProviderId};
use crate::config::{Settings, CHATGPT_API_URL, GEMINI_API_BASE, GROK_API_URL};

/// Default output token limit for chat requests
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default sampling temperature for chat requests
const DEFAULT_TEMPERATURE: f32 = 0.7;

fn builtin_descriptor(id: ProviderId, endpoint: String) -> ProviderDescriptor {
    let (display_name, emoji, model_name) = match id {
        ProviderId::ChatGpt => ("ChatGPT", "🤖", "gpt-4"),
        ProviderId::Gemini => ("Gemini", "🧠", "gemini-1.5-flash"),
        ProviderId::Grok => ("Grok", "🔮", "grok-2"),
    };

    ProviderDescriptor {
        id,
        display_name,
        emoji,
        model_name: model_name.to_string(),
        max_tokens: DEFAULT_MAX_TOKENS,
        temperature: DEFAULT_TEMPERATURE,
        endpoint,
    }
}

/// Read-only lookup from provider id to descriptor
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    descriptors: Vec<ProviderDescriptor>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::from_endpoints(CHATGPT_API_URL, GEMINI_API_BASE, GROK_API_URL)
    }
}

impl ProviderCatalog {
    /// Catalog with endpoints taken from settings
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_endpoints(
            &settings.chatgpt_api_url,
            &settings.gemini_api_base,
            &settings.grok_api_url,
        )
    }

    fn from_endpoints(chatgpt: &str, gemini: &str, grok: &str) -> Self {
        Self {
            descriptors: vec![
                builtin_descriptor(ProviderId::ChatGpt, chatgpt.to_string()),
                builtin_descriptor(ProviderId::Gemini, gemini.to_string()),
                builtin_descriptor(ProviderId::Grok, grok.to_string()),
            ],
        }
    }

    /// Catalog built from explicit descriptors, in the given order.
    ///
    /// Later duplicates of an id are dropped.
    #[must_use]
    pub fn from_descriptors(descriptors: Vec<ProviderDescriptor>) -> Self {
        let mut unique: Vec<ProviderDescriptor> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if !unique.iter().any(|d| d.id == descriptor.id) {
                unique.push(descriptor);
            }
        }
        Self {
            descriptors: unique,
        }
    }

    /// Replace the endpoint of one provider
    #[must_use]
    pub fn with_endpoint(mut self, id: ProviderId, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if let Some(descriptor) = self.descriptors.iter_mut().find(|d| d.id == id) {
            descriptor.endpoint = endpoint;
        }
        self
    }

    /// All descriptors in stable enumeration order
    #[must_use]
    pub fn list(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    /// Descriptor for `id`, if it is part of the catalog
    #[must_use]
    pub fn get(&self, id: ProviderId) -> Option<&ProviderDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Provider ids in enumeration order
    pub fn ids(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.descriptors.iter().map(|d| d.id)
    }
}
