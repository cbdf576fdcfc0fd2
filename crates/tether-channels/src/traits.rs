//! Channel adapter traits.
//!
//! - [`Channel`] -- implemented by each transport adapter.
//! - [`ChannelHost`] -- implemented by the runtime, consumed by adapters to
//!   deliver inbound messages without holding application state.
//!
//! Capability flags let the core tailor behaviour (streaming edits,
//! threads, reactions) without downcasting adapters.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_types::event::{InboundMessage, OutboundMessage};

/// Channel-layer error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Failed to establish a connection to the channel backend.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication / authorization was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Sending a message failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The requested channel was not found.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// The channel is not currently connected.
    #[error("not connected")]
    NotConnected,

    /// Catch-all for errors that do not fit other variants.
    #[error("{0}")]
    Other(String),
}

/// Where a capability applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityScope {
    /// Disabled everywhere.
    #[default]
    Off,
    /// Direct messages only.
    Dm,
    /// Group chats only.
    Group,
    /// Everywhere.
    All,
    /// Only chats on an explicit allow-list.
    Allowlist,
}

/// Optional features a channel adapter supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChannelCapabilities {
    #[serde(default)]
    pub reactions: CapabilityScope,
    #[serde(default)]
    pub inline_buttons: CapabilityScope,
    #[serde(default)]
    pub threads: bool,
    #[serde(default)]
    pub polls: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub media: bool,
    #[serde(default)]
    pub native_commands: bool,
}

/// Lifecycle status of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error(String),
}

/// An incremental edit for channels that support streaming replies.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Accumulated text so far.
    pub content: String,

    /// True on the final chunk.
    pub done: bool,
}

/// A bidirectional connection to a chat platform.
///
/// Lifecycle: the runtime calls [`start`](Channel::start) with a host and
/// a cancellation token; `start` runs until the token fires. `stop` is
/// idempotent. Outbound delivery goes through [`send`](Channel::send).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "telegram").
    fn name(&self) -> &str;

    /// Feature flags for this adapter.
    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::default()
    }

    /// Current lifecycle status.
    fn status(&self) -> ChannelStatus;

    /// Run the receive loop until `cancel` fires.
    ///
    /// Inbound messages are delivered via [`ChannelHost::deliver_inbound`].
    async fn start(
        &self,
        host: std::sync::Arc<dyn ChannelHost>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Stop the adapter. Idempotent; joins the receive loop before returning.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver one outbound message synchronously.
    ///
    /// Implementations must attach `reply_to` when it is non-empty and the
    /// platform supports replies.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Deliver a reply as a stream of incremental edits.
    ///
    /// Default implementation drains the stream and sends the final chunk
    /// as a single message.
    async fn send_stream(
        &self,
        chat_id: &str,
        mut rx: mpsc::Receiver<StreamMessage>,
    ) -> Result<(), ChannelError> {
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            let done = chunk.done;
            last = Some(chunk);
            if done {
                break;
            }
        }
        if let Some(chunk) = last {
            let msg = OutboundMessage {
                id: String::new(),
                channel: self.name().to_string(),
                chat_id: chat_id.to_string(),
                content: chunk.content,
                reply_to: None,
                media: Vec::new(),
                timestamp: chrono::Utc::now(),
                metadata: HashMap::new(),
            };
            self.send(&msg).await?;
        }
        Ok(())
    }
}

/// Services the runtime exposes to channel adapters.
#[async_trait]
pub trait ChannelHost: Send + Sync {
    /// Deliver an inbound message from a channel into the runtime.
    async fn deliver_inbound(&self, msg: InboundMessage) -> Result<(), ChannelError>;
}
