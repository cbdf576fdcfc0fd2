//! The core [`Provider`] trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{ChatInput, ProviderResponse};

/// A provider that can execute chat completion requests.
///
/// Implementations handle protocol details for a specific LLM API.
/// Streaming backends aggregate their deltas and return the final
/// response; the orchestrator only consumes the aggregated shape.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g. "openai", "local").
    fn name(&self) -> &str;

    /// Execute a chat completion request.
    ///
    /// The call must observe `cancel` and return
    /// [`ProviderError::Cancelled`](crate::error::ProviderError::Cancelled)
    /// promptly when it fires.
    async fn chat(
        &self,
        input: ChatInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse>;
}
