//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless completion service - each call is independent
///
/// Every pipeline stage sends one self-contained prompt; no conversation
/// state is kept between calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request and wait for the full response
    ///
    /// Implementations make exactly one attempt. Retrying transient failures
    /// is the caller's decision (see `LlmError::is_retryable`).
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}
