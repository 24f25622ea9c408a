use async_trait::async_trait;

use crate::types::{CompletionRequest, CompletionResponse, ProviderCapabilities};
use crate::LLMError;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "gemini")]
pub mod openai;
pub mod scripted;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    /// Releases any resources held by the provider. Callers go through
    /// [`crate::backend::BackendClient::close`], which guarantees a single call.
    async fn close(&self) -> Result<(), LLMError> {
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    fn name(&self) -> &'static str;
}
