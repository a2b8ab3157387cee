mod chatgpt;
mod gemini;
mod grok;
mod openai_compat;

pub use chatgpt::ChatGptProvider;
pub use gemini::GeminiProvider;
pub use grok::GrokProvider;
