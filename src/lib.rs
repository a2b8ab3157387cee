//! Multi-provider AI dispatcher with failover and an asynchronous task
//! registry for long-running document and image analysis.
//!
//! - [`dispatch::Dispatcher`] tries `ChatGPT`, Gemini and Grok in order,
//!   retrying each a bounded number of times.
//! - [`tasks::TaskRegistry`] is a single-writer actor holding task state;
//!   [`tasks::TaskExecutor`] drives analysis tasks in the background.
#![deny(missing_docs)]

/// Settings and explicit configuration values
pub mod config;
/// Fallback dispatcher and cached web search
pub mod dispatch;
/// Provider catalog, request values and provider clients
pub mod llm;
/// Error and notification sinks
pub mod sinks;
pub mod storage;
/// Named chat personas
pub mod styles;
pub mod tasks;

#[cfg(test)]
mod testing;
