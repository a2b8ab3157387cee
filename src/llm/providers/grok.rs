use super::openai_compat;
use crate::llm::{LlmError, LlmProvider, ProviderDescriptor, RequestSpec};
use async_trait::async_trait;
use reqwest::Client as HttpClient;

/// LLM provider implementation for xAI Grok
pub struct GrokProvider {
    http_client: HttpClient,
    api_key: String,
}

impl GrokProvider {
    /// Create a new Grok provider instance
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: crate::llm::http_utils::create_http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for GrokProvider {
    async fn invoke(
        &self,
        spec: &RequestSpec,
        descriptor: &ProviderDescriptor,
    ) -> Result<String, LlmError> {
        openai_compat::chat_completion(&self.http_client, &self.api_key, spec, descriptor).await
    }
}
