use crate::llm::http_utils::{extract_text_content, send_json_request};
use crate::llm::{LlmError, LlmProvider, ProviderDescriptor, RequestSpec};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

const RESPONSE_PATH: &[&str] = &["candidates", "0", "content", "parts", "0", "text"];

/// LLM provider implementation for Google Gemini
pub struct GeminiProvider {
    http_client: HttpClient,
    api_key: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider instance
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: crate::llm::http_utils::create_http_client(),
            api_key,
        }
    }

    fn build_request_body(spec: &RequestSpec, descriptor: &ProviderDescriptor) -> Value {
        let mut parts = vec![json!({"text": spec.full_prompt()})];
        if let Some(image) = &spec.image {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": BASE64.encode(image.bytes.as_slice())
                }
            }));
        }

        json!({
            "contents": [{
                "role": "user",
                "parts": parts
            }],
            "generationConfig": {
                "temperature": spec.temperature_for(descriptor),
                "maxOutputTokens": descriptor.max_tokens
            }
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn invoke(
        &self,
        spec: &RequestSpec,
        descriptor: &ProviderDescriptor,
    ) -> Result<String, LlmError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            descriptor.endpoint.trim_end_matches('/'),
            descriptor.model_name,
            self.api_key
        );

        let body = Self::build_request_body(spec, descriptor);
        let res_json = send_json_request(&self.http_client, &url, &body, None).await?;
        extract_text_content(&res_json, RESPONSE_PATH)
    }
}
