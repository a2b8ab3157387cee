//! OpenAI-compatible provider utilities
//!
//! Shared implementation for providers speaking the chat-completions
//! protocol (`ChatGPT`, Grok).

use crate::llm::http_utils::{extract_text_content, send_json_request};
use crate::llm::{LlmError, ProviderDescriptor, RequestSpec};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

const RESPONSE_PATH: &[&str] = &["choices", "0", "message", "content"];

/// Build the chat-completions request body.
///
/// Images travel as an `image_url` content part holding a data URI.
pub fn build_request_body(spec: &RequestSpec, descriptor: &ProviderDescriptor) -> Value {
    let prompt = spec.full_prompt();
    let content = match &spec.image {
        Some(image) => json!([
            {"type": "text", "text": prompt},
            {
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", image.mime_type, BASE64.encode(image.bytes.as_slice()))
                }
            }
        ]),
        None => Value::String(prompt),
    };

    json!({
        "model": descriptor.model_name,
        "messages": [{"role": "user", "content": content}],
        "max_tokens": descriptor.max_tokens,
        "temperature": spec.temperature_for(descriptor)
    })
}

/// Perform one chat completion against an OpenAI-compatible endpoint
pub async fn chat_completion(
    client: &HttpClient,
    api_key: &str,
    spec: &RequestSpec,
    descriptor: &ProviderDescriptor,
) -> Result<String, LlmError> {
    let body = build_request_body(spec, descriptor);
    let auth = format!("Bearer {api_key}");
    let res_json = send_json_request(client, &descriptor.endpoint, &body, Some(&auth)).await?;
    extract_text_content(&res_json, RESPONSE_PATH)
}
