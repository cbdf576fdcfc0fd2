//! Provider request/response types.
//!
//! The response shape follows the contract in the rest of the workspace:
//! aggregated content plus extracted tool calls, a finish reason, and
//! usage counters. Streaming providers return the same aggregated shape.

use serde::{Deserialize, Serialize};

use tether_types::message::Message;
use tether_types::provider::ToolDef;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Model identifier override.
    pub model: Option<String>,

    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f64>,
}

/// A tool call extracted from a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call id, echoed in the tool-result message.
    pub id: String,

    /// Tool name.
    pub name: String,

    /// Parsed arguments object.
    pub params: serde_json::Value,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,

    /// Tokens generated.
    pub completion_tokens: u32,

    /// Total tokens billed.
    pub total_tokens: u32,
}

/// An aggregated chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Assistant text content (may be empty when only tools are called).
    pub content: String,

    /// Tool calls requested by the model.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Why generation stopped (e.g. "stop", "tool_calls", "length").
    #[serde(default)]
    pub finish_reason: Option<String>,

    /// Token usage, when reported.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ProviderResponse {
    /// A plain-text response with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".into()),
            usage: None,
        }
    }

    /// Convert to an assistant [`Message`], preserving tool calls.
    pub fn to_message(&self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(self.content.clone())
        } else {
            Message::assistant_with_tools(
                self.content.clone(),
                self.tool_calls
                    .iter()
                    .map(|c| tether_types::message::ToolCall {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: c.params.clone(),
                    })
                    .collect(),
            )
        }
    }
}

/// The messages + tool definitions sent to a provider.
#[derive(Debug, Clone)]
pub struct ChatInput<'a> {
    /// Conversation messages (system first by convention).
    pub messages: &'a [Message],

    /// Tool definitions the model may call.
    pub tools: &'a [ToolDef],

    /// Per-call options.
    pub options: ChatOptions,
}
