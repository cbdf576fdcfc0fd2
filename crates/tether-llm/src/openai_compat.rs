//! OpenAI-compatible provider.
//!
//! [`OpenAiCompatProvider`] talks to any endpoint that accepts the OpenAI
//! chat completion format (OpenAI, Groq, DeepSeek, OpenRouter, local
//! gateways, ...). Responses are aggregated; tool-call arguments are
//! parsed from their JSON-string form into objects.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_types::message::{Message, Role};

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatInput, ProviderResponse, ToolCallRequest, Usage};

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider name used in logs.
    pub name: String,

    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Default model when the request does not set one.
    pub default_model: String,
}

/// An LLM provider speaking the OpenAI chat-completion wire format.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiCompatProvider {
    /// Create a provider with an explicit API key.
    pub fn new(config: ProviderConfig, api_key: String) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn build_body(&self, input: &ChatInput<'_>) -> serde_json::Value {
        let model = input
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let messages: Vec<serde_json::Value> =
            input.messages.iter().map(wire_message).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        if !input.tools.is_empty() {
            let tools: Vec<serde_json::Value> = input
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        if let Some(max_tokens) = input.options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = input.options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn chat(
        &self,
        input: ChatInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse> {
        let url = self.completions_url();
        let body = self.build_body(&input);

        debug!(
            provider = %self.config.name,
            messages = input.messages.len(),
            tools = input.tools.len(),
            "sending chat completion request"
        );

        let request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = request => resp?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status.as_u16(), &body));
        }

        let wire: WireResponse = response.json().await?;
        parse_response(wire)
    }
}

/// Serialize one [`Message`] into the OpenAI wire shape.
fn wire_message(msg: &Message) -> serde_json::Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut out = serde_json::json!({"role": role});

    if msg.role == Role::User && !msg.images.is_empty() {
        let mut parts = vec![serde_json::json!({"type": "text", "text": msg.content})];
        for url in &msg.images {
            parts.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": url},
            }));
        }
        out["content"] = serde_json::Value::Array(parts);
    } else {
        out["content"] = serde_json::json!(msg.content);
    }

    if let Some(ref id) = msg.tool_call_id {
        out["tool_call_id"] = serde_json::json!(id);
    }
    if let Some(ref calls) = msg.tool_calls {
        let wire_calls: Vec<serde_json::Value> = calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": serde_json::to_string(&c.arguments)
                            .unwrap_or_else(|_| "{}".into()),
                    }
                })
            })
            .collect();
        out["tool_calls"] = serde_json::Value::Array(wire_calls);
    }

    out
}

fn map_http_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthFailed(trimmed(body)),
        429 => {
            if body.contains("insufficient_quota") || body.contains("billing") {
                return ProviderError::Billing(trimmed(body));
            }
            warn!(body = %body, "rate limited");
            ProviderError::RateLimited {
                retry_after_ms: parse_retry_after_ms(body).unwrap_or(1000),
            }
        }
        400 if body.contains("context_length") || body.contains("maximum context") => {
            ProviderError::ContextOverflow(trimmed(body))
        }
        408 | 504 => ProviderError::Timeout,
        _ => ProviderError::RequestFailed(format!("HTTP {status}: {}", trimmed(body))),
    }
}

fn trimmed(body: &str) -> String {
    let s = body.trim();
    if s.len() <= 400 {
        return s.to_string();
    }
    let mut end = 400;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
}

// ── Wire response shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

fn parse_response(wire: WireResponse) -> Result<ProviderResponse> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| {
            let params = if c.function.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&c.function.arguments)
                    .unwrap_or(serde_json::Value::String(c.function.arguments))
            };
            ToolCallRequest {
                id: c.id,
                name: c.function.name,
                params,
            }
        })
        .collect();

    Ok(ProviderResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason,
        usage: wire.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}
