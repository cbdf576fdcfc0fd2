//! LLM provider abstraction for tether.
//!
//! - [`Provider`] -- the chat-completion contract the orchestrator calls.
//! - [`OpenAiCompatProvider`] -- HTTP client for any OpenAI-compatible API.
//! - [`classify`] -- maps opaque provider error text to a [`FailoverReason`].
//! - [`retry`] -- exponential-backoff retry with attempt recording.

pub mod classify;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod retry;
pub mod types;

pub use classify::{FailoverReason, classify_error};
pub use error::{ProviderError, Result};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use retry::{RetryAttempt, RetryConfig, retry};
pub use types::{ChatOptions, ProviderResponse, ToolCallRequest, Usage};
