//! HTTP utilities for LLM providers
//!
//! Common request/response handling shared by all provider implementations.
//! Every failure is mapped onto a distinct `LlmError` variant.

use crate::config::get_llm_http_timeout_secs;
use crate::llm::LlmError;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;

/// Longest provider error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client configured with the standard LLM timeout.
///
/// Uses `LLM_HTTP_TIMEOUT_SECS` environment variable or 30s default.
#[must_use]
pub fn create_http_client() -> HttpClient {
    let timeout = Duration::from_secs(get_llm_http_timeout_secs());
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Sends an HTTP POST request with JSON body and returns parsed JSON response.
///
/// # Errors
///
/// Returns `LlmError::Transport` on connectivity issues, `LlmError::Rejected` on non-success
/// status codes, or `LlmError::MalformedResponse` if the body is not JSON.
pub async fn send_json_request(
    client: &HttpClient,
    url: &str,
    body: &Value,
    auth_header: Option<&str>,
) -> Result<Value, LlmError> {
    let mut request = client.post(url).json(body);

    if let Some(auth) = auth_header {
        request = request.header("Authorization", auth);
    }

    let response = request
        .send()
        .await
        .map_err(|e| LlmError::Transport(e.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(LlmError::Rejected {
            status: status.as_u16(),
            message: clean_error_body(&error_text),
        });
    }

    response
        .json()
        .await
        .map_err(|e| LlmError::MalformedResponse(e.without_url().to_string()))
}

/// Shortens a provider error body for logs and error events.
fn clean_error_body(error_text: &str) -> String {
    let trimmed = error_text.trim_start();
    // Nginx/proxy error pages are useless in an error message
    if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") || trimmed.starts_with("<HTML")
    {
        return "server returned HTML error page".to_string();
    }

    let trimmed = error_text.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{truncated}... (truncated)")
    } else {
        trimmed.to_string()
    }
}

/// Extracts text content from a JSON response by navigating a path.
///
/// Numeric segments index into arrays, all others are object keys. The text
/// is returned trimmed.
///
/// # Example
/// ```ignore
/// // Gemini: ["candidates", "0", "content", "parts", "0", "text"]
/// // OpenAI-compatible: ["choices", "0", "message", "content"]
/// let content = extract_text_content(&response, &["choices", "0", "message", "content"])?;
/// ```
///
/// # Errors
///
/// Returns `LlmError::MalformedResponse` if the path does not exist or does not end in a string,
/// and `LlmError::EmptyResponse` if it ends in `null` or in blank text.
pub fn extract_text_content(response: &Value, path: &[&str]) -> Result<String, LlmError> {
    let mut current = response;

    for segment in path {
        current = if let Ok(index) = segment.parse::<usize>() {
            current.get(index).ok_or_else(|| {
                LlmError::MalformedResponse(format!("missing index {index} in response"))
            })?
        } else {
            current.get(*segment).ok_or_else(|| {
                LlmError::MalformedResponse(format!("missing key {segment} in response"))
            })?
        };
    }

    match current {
        Value::Null => Err(LlmError::EmptyResponse),
        Value::String(text) if text.trim().is_empty() => Err(LlmError::EmptyResponse),
        Value::String(text) => Ok(text.trim().to_string()),
        other => Err(LlmError::MalformedResponse(format!(
            "expected string at response path, got: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPENAI_PATH: &[&str] = &["choices", "0", "message", "content"];

    #[test]
    fn test_extract_trims_text() {
        let value = json!({"choices": [{"message": {"content": "  Hello \n"}}]});
        assert_eq!(
            extract_text_content(&value, OPENAI_PATH),
            Ok("Hello".to_string())
        );
    }

    #[test]
    fn test_extract_blank_text_is_empty_response() {
        let value = json!({"choices": [{"message": {"content": "   "}}]});
        assert_eq!(
            extract_text_content(&value, OPENAI_PATH),
            Err(LlmError::EmptyResponse)
        );
    }

    #[test]
    fn test_extract_null_text_is_empty_response() {
        let value = json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(
            extract_text_content(&value, OPENAI_PATH),
            Err(LlmError::EmptyResponse)
        );
    }

    #[test]
    fn test_extract_missing_path_is_malformed() {
        let value = json!({"choices": []});
        assert!(matches!(
            extract_text_content(&value, OPENAI_PATH),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_extract_non_string_is_malformed() {
        let value = json!({"choices": [{"message": {"content": 42}}]});
        assert!(matches!(
            extract_text_content(&value, OPENAI_PATH),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_clean_error_body_hides_html() {
        assert_eq!(
            clean_error_body("<!DOCTYPE html><html>502</html>"),
            "server returned HTML error page"
        );
    }

    #[test]
    fn test_clean_error_body_truncates() {
        let body = "x".repeat(600);
        let cleaned = clean_error_body(&body);
        assert!(cleaned.ends_with("... (truncated)"));
        assert_eq!(cleaned.len(), MAX_ERROR_BODY_CHARS + "... (truncated)".len());
    }
}
