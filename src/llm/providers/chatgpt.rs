use super::openai_compat;
use crate::llm::{LlmError, LlmProvider, ProviderDescriptor, RequestSpec};
use async_trait::async_trait;
use reqwest::Client as HttpClient;

/// LLM provider implementation for `OpenAI` `ChatGPT`
pub struct ChatGptProvider {
    http_client: HttpClient,
    api_key: String,
}

impl ChatGptProvider {
    /// Create a new `ChatGPT` provider instance
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: crate::llm::http_utils::create_http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for ChatGptProvider {
    async fn invoke(
        &self,
        spec: &RequestSpec,
        descriptor: &ProviderDescriptor,
    ) -> Result<String, LlmError> {
        openai_compat::chat_completion(&self.http_client, &self.api_key, spec, descriptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderCatalog, ProviderId};
    use mockito::{Matcher, Server};

    fn descriptor(endpoint: String) -> ProviderDescriptor {
        ProviderCatalog::default()
            .with_endpoint(ProviderId::ChatGpt, endpoint)
            .get(ProviderId::ChatGpt)
            .cloned()
            .expect("chatgpt descriptor")
    }

    #[tokio::test]
    async fn test_invoke_returns_trimmed_text() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJsonString(
                r#"{"model":"gpt-4","messages":[{"role":"user","content":"Be brief.\n\nhi"}]}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":" Hello! "}}]}"#)
            .create_async()
            .await;

        let provider = ChatGptProvider::new("sk-test".to_string());
        let spec = RequestSpec::new("hi").with_style_directive("Be brief.");
        let result = provider
            .invoke(&spec, &descriptor(format!("{}/v1/chat/completions", server.url())))
            .await;

        assert_eq!(result, Ok("Hello!".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invoke_maps_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let provider = ChatGptProvider::new("sk-test".to_string());
        let result = provider
            .invoke(
                &RequestSpec::new("hi"),
                &descriptor(format!("{}/v1/chat/completions", server.url())),
            )
            .await;

        assert_eq!(
            result,
            Err(LlmError::Rejected {
                status: 429,
                message: "rate limited".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_invoke_rejects_empty_content() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":""}}]}"#)
            .create_async()
            .await;

        let provider = ChatGptProvider::new("sk-test".to_string());
        let result = provider
            .invoke(
                &RequestSpec::new("hi"),
                &descriptor(format!("{}/v1/chat/completions", server.url())),
            )
            .await;

        assert_eq!(result, Err(LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_invoke_reports_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let provider = ChatGptProvider::new("sk-test".to_string());
        let result = provider
            .invoke(
                &RequestSpec::new("hi"),
                &descriptor(format!("{}/v1/chat/completions", server.url())),
            )
            .await;

        assert!(matches!(result, Err(LlmError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_invoke_reports_transport_failure() {
        let provider = ChatGptProvider::new("sk-test".to_string());
        // Port 9 (discard) is not listening on loopback
        let result = provider
            .invoke(
                &RequestSpec::new("hi"),
                &descriptor("http://127.0.0.1:9/v1/chat/completions".to_string()),
            )
            .await;

        assert!(matches!(result, Err(LlmError::Transport(_))));
    }
}
