//! Text-generation collaborator
//!
//! Used only by the LLM-backed correction generator. Every answer is treated
//! as an untrusted suggestion: the applier and the re-execution validate it.

mod anthropic;
mod client;
mod error;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
#[cfg(test)]
pub use client::mock;
pub use error::LlmError;
pub use types::{CompletionRequest, CompletionResponse, Message, Role};

use crate::config::LlmConfig;

/// Build a client for the configured provider
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicClient::from_config(config)?)),
        other => Err(LlmError::Config(format!("Unsupported LLM provider: {}", other))),
    }
}
