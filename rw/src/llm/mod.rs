//! LLM client module
//!
//! The generation backend, its error type, and the retrying execution wrapper.

use std::sync::Arc;

use tracing::debug;

mod anthropic;
pub mod client;
mod error;
mod retry;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::{LlmError, is_retryable_status};
pub use retry::{RetryPolicy, RetryingClient};
pub use types::{
    CompletionRequest, CompletionResponse, Message, Role, StopReason, TokenUsage, ToolCall, ToolDefinition,
};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
///
/// The returned client already applies `policy`, so callers issue each request once.
pub fn create_client(config: &LlmConfig, policy: RetryPolicy) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    let backend: Arc<dyn LlmClient> = match config.provider.as_str() {
        "anthropic" => {
            debug!("create_client: creating Anthropic client");
            Arc::new(AnthropicClient::from_config(config)?)
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            return Err(LlmError::InvalidResponse(format!(
                "Unknown LLM provider: '{}'. Supported: anthropic",
                other
            )));
        }
    };

    Ok(Arc::new(RetryingClient::new(backend, policy)))
}
