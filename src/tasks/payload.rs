//! Payload resolution
//!
//! Turns an opaque locator (a Telegram `file_id`) into the bytes an analysis
//! task works on. Resolution happens inside the task, so a failure here is
//! recorded as a failed task rather than rejected at submission.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::config::{
    Settings, TaskConfig, TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS,
    TELEGRAM_API_MAX_RETRIES,
};

/// Opaque reference to a document or image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadLocator(String);

impl PayloadLocator {
    /// Wrap a file id
    #[must_use]
    pub fn new(file_id: impl Into<String>) -> Self {
        Self(file_id.into())
    }

    /// Borrow the file id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Raw content
    pub bytes: Vec<u8>,
    /// MIME type, when it could be determined
    pub mime_type: Option<String>,
}

impl Payload {
    /// Decode the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Decode` if the bytes are not valid UTF-8.
    pub fn into_text(self) -> Result<String, PayloadError> {
        String::from_utf8(self.bytes)
            .map_err(|e| PayloadError::Decode(format!("document is not valid UTF-8: {e}")))
    }
}

/// Reasons a payload could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Network error talking to the file host
    #[error("Failed to fetch file: {0}")]
    Fetch(String),
    /// The file host answered with a non-success status
    #[error("Failed to get file info: {status} {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Status text or description returned by the host
        message: String,
    },
    /// The file exceeds the size limit
    #[error("File too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Size of the file in bytes
        size: u64,
        /// Configured limit in bytes
        limit: u64,
    },
    /// The bytes could not be decoded for the requested analysis
    #[error("Failed to decode file: {0}")]
    Decode(String),
    /// The file host returned an unexpected response
    #[error("Unexpected file host response: {0}")]
    Malformed(String),
    /// No resolver is configured
    #[error("File resolution is not configured")]
    NotConfigured,
}

impl PayloadError {
    /// Network errors and server-side statuses are worth another attempt
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::TooLarge { .. } | Self::Decode(_) | Self::Malformed(_) | Self::NotConfigured => {
                false
            }
        }
    }
}

/// Resolves payload locators into bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadResolver: Send + Sync {
    /// Fetch the bytes behind `locator`.
    ///
    /// # Errors
    ///
    /// Returns a `PayloadError` if the payload cannot be fetched or is too
    /// large.
    async fn resolve(&self, locator: &PayloadLocator) -> Result<Payload, PayloadError>;
}

#[derive(Debug, Deserialize)]
struct GetFileResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    file_path: Option<String>,
}

/// `PayloadResolver` backed by the Telegram Bot API file endpoints
pub struct TelegramFileResolver {
    http_client: HttpClient,
    api_base: String,
    token: String,
    max_bytes: u64,
}

impl TelegramFileResolver {
    /// Create a resolver for `token` against `api_base`
    #[must_use]
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            http_client: crate::llm::http_utils::create_http_client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            max_bytes,
        }
    }

    /// Resolver from settings, if a bot token is configured.
    ///
    /// The size limit comes from the task configuration.
    #[must_use]
    pub fn from_settings(settings: &Settings, tasks: &TaskConfig) -> Option<Self> {
        settings
            .telegram_token
            .as_ref()
            .filter(|token| !token.is_empty())
            .map(|token| {
                Self::new(
                    settings.telegram_api_base.clone(),
                    token.clone(),
                    tasks.max_payload_bytes,
                )
            })
    }

    fn check_size(&self, size: u64) -> Result<(), PayloadError> {
        if size > self.max_bytes {
            return Err(PayloadError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    async fn get_file_path(&self, locator: &PayloadLocator) -> Result<String, PayloadError> {
        let url = format!("{}/bot{}/getFile", self.api_base, self.token);
        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "file_id": locator.as_str() }))
            .send()
            .await
            .map_err(|e| PayloadError::Fetch(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PayloadError::Rejected {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body: GetFileResponse = response
            .json()
            .await
            .map_err(|e| PayloadError::Malformed(e.without_url().to_string()))?;
        if !body.ok {
            return Err(PayloadError::Malformed(
                body.description.unwrap_or_else(|| "getFile failed".to_string()),
            ));
        }

        let info = body
            .result
            .ok_or_else(|| PayloadError::Malformed("getFile returned no result".to_string()))?;
        if let Some(size) = info.file_size {
            self.check_size(size)?;
        }
        info.file_path
            .ok_or_else(|| PayloadError::Malformed("getFile returned no file_path".to_string()))
    }

    async fn download(&self, file_path: &str) -> Result<Vec<u8>, PayloadError> {
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| PayloadError::Fetch(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PayloadError::Rejected {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        // Chunked responses carry no length, so the limit is enforced while reading
        let mut response = response;
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PayloadError::Fetch(e.without_url().to_string()))?
        {
            self.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    async fn fetch_once(&self, locator: &PayloadLocator) -> Result<Payload, PayloadError> {
        let file_path = self.get_file_path(locator).await?;
        let bytes = self.download(&file_path).await?;
        debug!(file_id = %locator, size = bytes.len(), "Downloaded file");
        Ok(Payload {
            bytes,
            mime_type: mime_from_path(&file_path).map(ToString::to_string),
        })
    }
}

#[async_trait]
impl PayloadResolver for TelegramFileResolver {
    async fn resolve(&self, locator: &PayloadLocator) -> Result<Payload, PayloadError> {
        let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
            .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
            .map(jitter)
            .take(TELEGRAM_API_MAX_RETRIES);

        RetryIf::spawn(
            retry_strategy,
            || self.fetch_once(locator),
            PayloadError::is_transient,
        )
        .await
        .map_err(|e| {
            warn!(file_id = %locator, error = %e, "File resolution failed");
            e
        })
    }
}

/// Guess a MIME type from the file extension
fn mime_from_path(path: &str) -> Option<&'static str> {
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "txt" | "md" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}
