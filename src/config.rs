//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and turns them
//! into the explicit configuration values consumed by the dispatcher and the
//! task registry.

use crate::llm::ProviderId;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts per provider before moving on to the next one
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Fixed pause between two attempts against the same provider
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
/// Upper bound for a single provider invocation
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;

/// Completed tasks are purged this long after creation (1 hour)
pub const COMPLETED_TASK_TTL_SECS: u64 = 3600;
/// Failed tasks are purged this long after creation (24 hours)
pub const FAILED_TASK_TTL_SECS: u64 = 86_400;
/// How often the background sweeper runs
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
/// Largest payload the executor accepts (10MB)
pub const MAX_PAYLOAD_BYTES: u64 = 10_485_760;
/// Pending commands buffered by the registry actor
pub const REGISTRY_MAILBOX_CAPACITY: usize = 256;

/// Web search answers are cached for 20 minutes
pub const SEARCH_CACHE_TTL_SECS: u64 = 1200;
/// Maximum number of cached search answers
pub const SEARCH_CACHE_MAX_ENTRIES: u64 = 1000;
/// Error log entries are kept for 7 days
pub const ERROR_LOG_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Temperature for document summaries and web search
pub const ANALYSIS_TEMPERATURE: f32 = 0.3;
/// Instruction placed in front of document text
pub const DOCUMENT_SUMMARY_PROMPT: &str = "Summarize this document:";
/// Instruction sent together with an image
pub const IMAGE_ANALYSIS_PROMPT: &str = "Analyze this image in detail:";

/// Default HTTP client timeout for provider calls
pub const DEFAULT_LLM_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default endpoint for `ChatGPT`
pub const CHATGPT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
/// Default endpoint for Grok
pub const GROK_API_URL: &str = "https://api.x.ai/v1/chat/completions";
/// Default base for Gemini `generateContent` calls
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
/// Default Telegram Bot API base
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

// Telegram file download retry configuration
/// Initial backoff for Telegram file operations
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for Telegram file operations
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Retries after the first failed Telegram file operation
pub const TELEGRAM_API_MAX_RETRIES: usize = 2;

/// Application settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// `ChatGPT` API key
    pub chatgpt_api_key: Option<String>,
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Grok API key
    pub grok_api_key: Option<String>,

    /// `ChatGPT` chat-completions endpoint
    #[serde(default = "default_chatgpt_api_url")]
    pub chatgpt_api_url: String,
    /// Grok chat-completions endpoint
    #[serde(default = "default_grok_api_url")]
    pub grok_api_url: String,
    /// Gemini models base URL
    #[serde(default = "default_gemini_api_base")]
    pub gemini_api_base: String,

    /// Telegram Bot API token, used to download documents and photos
    pub telegram_token: Option<String>,
    /// Telegram Bot API base URL
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,

    /// Provider tried first when the caller does not pick one
    pub default_provider: Option<String>,

    /// Attempts per provider
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Deadline for a single provider attempt in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Age in seconds after which completed tasks are purged
    #[serde(default = "default_completed_task_ttl_secs")]
    pub completed_task_ttl_secs: u64,
    /// Age in seconds after which failed tasks are purged
    #[serde(default = "default_failed_task_ttl_secs")]
    pub failed_task_ttl_secs: u64,
    /// Interval in seconds between registry sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Largest accepted document or image in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Route document analysis to this provider
    pub document_provider: Option<String>,
    /// Route image analysis to this provider
    pub image_provider: Option<String>,
    /// Let analysis tasks fall back to other providers
    #[serde(default)]
    pub analysis_fallback: bool,

    /// Search cache lifetime in seconds
    #[serde(default = "default_search_cache_ttl_secs")]
    pub search_cache_ttl_secs: u64,
}

fn default_chatgpt_api_url() -> String {
    CHATGPT_API_URL.to_string()
}

fn default_grok_api_url() -> String {
    GROK_API_URL.to_string()
}

fn default_gemini_api_base() -> String {
    GEMINI_API_BASE.to_string()
}

fn default_telegram_api_base() -> String {
    TELEGRAM_API_BASE.to_string()
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

const fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

const fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}

const fn default_completed_task_ttl_secs() -> u64 {
    COMPLETED_TASK_TTL_SECS
}

const fn default_failed_task_ttl_secs() -> u64 {
    FAILED_TASK_TTL_SECS
}

const fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

const fn default_max_payload_bytes() -> u64 {
    MAX_PAYLOAD_BYTES
}

const fn default_search_cache_ttl_secs() -> u64 {
    SEARCH_CACHE_TTL_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chatgpt_api_key: None,
            gemini_api_key: None,
            grok_api_key: None,
            chatgpt_api_url: default_chatgpt_api_url(),
            grok_api_url: default_grok_api_url(),
            gemini_api_base: default_gemini_api_base(),
            telegram_token: None,
            telegram_api_base: default_telegram_api_base(),
            default_provider: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            completed_task_ttl_secs: COMPLETED_TASK_TTL_SECS,
            failed_task_ttl_secs: FAILED_TASK_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            document_provider: None,
            image_provider: None,
            analysis_fallback: false,
            search_cache_ttl_secs: SEARCH_CACHE_TTL_SECS,
        }
    }
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a present config file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg. `APP__MAX_RETRIES=3`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain UPPER_SNAKE_CASE env vars map to snake_case keys
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Load settings from config files and the environment
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading or deserialization fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Explicit dispatcher configuration derived from these settings
    #[must_use]
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    /// Explicit task registry configuration derived from these settings
    #[must_use]
    pub fn task_config(&self) -> TaskConfig {
        TaskConfig {
            completed_ttl: Duration::from_secs(self.completed_task_ttl_secs),
            failed_ttl: Duration::from_secs(self.failed_task_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_payload_bytes: self.max_payload_bytes,
            mailbox_capacity: REGISTRY_MAILBOX_CAPACITY,
        }
    }

    /// Provider routing for analysis tasks.
    ///
    /// Unknown provider names fall back to the defaults.
    #[must_use]
    pub fn analysis_routing(&self) -> AnalysisRouting {
        let defaults = AnalysisRouting::default();
        AnalysisRouting {
            document: self
                .document_provider
                .as_deref()
                .and_then(|name| name.parse().ok())
                .unwrap_or(defaults.document),
            image: self
                .image_provider
                .as_deref()
                .and_then(|name| name.parse().ok())
                .unwrap_or(defaults.image),
            fallback: self.analysis_fallback,
        }
    }

    /// Parsed default provider, if configured and known
    #[must_use]
    pub fn default_provider(&self) -> Option<ProviderId> {
        self.default_provider
            .as_deref()
            .and_then(|name| name.parse().ok())
    }

    /// Every configured secret, used to mask them in log output
    #[must_use]
    pub fn secrets(&self) -> Vec<String> {
        [
            &self.chatgpt_api_key,
            &self.gemini_api_key,
            &self.grok_api_key,
            &self.telegram_token,
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect()
    }
}

/// Retry policy of the fallback dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Attempts per provider (values below 1 are treated as 1)
    pub max_retries: u32,
    /// Fixed wait between attempts against the same provider
    pub retry_delay: Duration,
    /// Deadline for one provider invocation
    pub attempt_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

/// Lifetimes and limits of the task registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Completed tasks older than this are swept
    pub completed_ttl: Duration,
    /// Failed tasks older than this are swept
    pub failed_ttl: Duration,
    /// Interval of the background sweeper
    pub sweep_interval: Duration,
    /// Largest accepted payload in bytes
    pub max_payload_bytes: u64,
    /// Capacity of the registry actor mailbox
    pub mailbox_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            completed_ttl: Duration::from_secs(COMPLETED_TASK_TTL_SECS),
            failed_ttl: Duration::from_secs(FAILED_TASK_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            mailbox_capacity: REGISTRY_MAILBOX_CAPACITY,
        }
    }
}

/// Which provider handles each kind of analysis task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisRouting {
    /// Provider for document summaries
    pub document: ProviderId,
    /// Provider for image analysis
    pub image: ProviderId,
    /// Use the full fallback order instead of the routed provider alone
    pub fallback: bool,
}

impl Default for AnalysisRouting {
    fn default() -> Self {
        Self {
            document: ProviderId::Grok,
            image: ProviderId::Gemini,
            fallback: false,
        }
    }
}

/// HTTP client timeout for provider calls in seconds.
///
/// Reads `LLM_HTTP_TIMEOUT_SECS`, defaults to 30.
#[must_use]
pub fn get_llm_http_timeout_secs() -> u64 {
    std::env::var("LLM_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_LLM_HTTP_TIMEOUT_SECS)
}
