//! Bus event types.
//!
//! [`InboundMessage`] is user input arriving from a channel adapter,
//! [`OutboundMessage`] is an agent (or cron) reply heading back out.
//! The bus assigns `id` and `timestamp` when the producer left them empty.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound message received from a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message id. Assigned by the bus when empty.
    #[serde(default)]
    pub id: String,

    /// Channel name (e.g. "telegram", "slack", "cron").
    pub channel: String,

    /// Account identifier distinguishing concurrent accounts of one
    /// transport. Empty means the transport's single default account.
    #[serde(default)]
    pub account_id: String,

    /// Chat / conversation identifier within the channel.
    pub chat_id: String,

    /// Sender identifier within the channel.
    pub sender_id: String,

    /// Message text content.
    pub content: String,

    /// URLs or identifiers for attached media.
    #[serde(default)]
    pub media: Vec<String>,

    /// When the message was received. Assigned by the bus when missing.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Arbitrary channel-specific metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Session key for this conversation: `"{channel}:{account}:{chat_id}"`.
    pub fn session_key(&self) -> String {
        let account = if self.account_id.is_empty() {
            "default"
        } else {
            &self.account_id
        };
        format!("{}:{}:{}", self.channel, account, self.chat_id)
    }

    /// True when the message carries the `is_system_event` metadata flag
    /// (set by the cron service for system-event payloads).
    pub fn is_system_event(&self) -> bool {
        self.metadata
            .get("is_system_event")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// An outbound message to deliver through a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique message id. Assigned by the producer.
    #[serde(default)]
    pub id: String,

    /// Target channel name.
    pub channel: String,

    /// Target chat / conversation identifier.
    pub chat_id: String,

    /// Message text content.
    pub content: String,

    /// Inbound message id this is a reply to, when applicable.
    #[serde(default)]
    pub reply_to: Option<String>,

    /// URLs or identifiers for attached media.
    #[serde(default)]
    pub media: Vec<String>,

    /// When the message was produced.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Arbitrary channel-specific metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a reply to an inbound message, preserving channel, chat,
    /// and the `reply_to` linkage.
    pub fn reply_to_inbound(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: inbound.channel.clone(),
            chat_id: inbound.chat_id.clone(),
            content: content.into(),
            reply_to: if inbound.id.is_empty() {
                None
            } else {
                Some(inbound.id.clone())
            },
            media: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}
