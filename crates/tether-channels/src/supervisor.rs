//! Channel supervisor.
//!
//! Owns the registered channel adapters, runs each adapter's receive loop
//! as its own task, and dispatches outbound messages to the matching
//! adapter by name. The outbound feed is any mpsc receiver -- in the
//! running system it is a bus subscription drained by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether_types::event::OutboundMessage;

use crate::traits::{Channel, ChannelError, ChannelHost};

/// Supervises channel adapters and routes outbound traffic to them.
pub struct ChannelSupervisor {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
    host: Arc<dyn ChannelHost>,
    cancel: CancellationToken,
    tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl ChannelSupervisor {
    /// Create a supervisor delivering inbound messages to `host`.
    pub fn new(host: Arc<dyn ChannelHost>, cancel: CancellationToken) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            host,
            cancel,
            tasks: RwLock::new(Vec::new()),
        }
    }

    /// Register a channel adapter. Later registrations with the same name
    /// replace earlier ones.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        let mut channels = self.channels.write().await;
        if channels.insert(name.clone(), channel).is_some() {
            warn!(channel = %name, "replacing previously registered channel");
        } else {
            info!(channel = %name, "channel registered");
        }
    }

    /// Names of all registered channels.
    pub async fn registered(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    /// Start every registered channel's receive loop as a task.
    pub async fn start_all(&self) {
        let channels = self.channels.read().await;
        let mut tasks = self.tasks.write().await;

        for (name, channel) in channels.iter() {
            let channel = channel.clone();
            let host = self.host.clone();
            let cancel = self.cancel.child_token();
            let name = name.clone();

            tasks.push(tokio::spawn(async move {
                if let Err(e) = channel.start(host, cancel).await {
                    error!(channel = %name, error = %e, "channel receive loop failed");
                }
            }));
        }
    }

    /// Stop all channels and join their tasks. Idempotent.
    pub async fn stop_all(&self) {
        self.cancel.cancel();

        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "channel stop failed");
            }
        }
        drop(channels);

        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Deliver one outbound message to its target channel.
    pub async fn dispatch(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let channel = {
            let channels = self.channels.read().await;
            channels.get(&msg.channel).cloned()
        };

        match channel {
            Some(channel) => channel.send(msg).await,
            None => Err(ChannelError::NotFound(msg.channel.clone())),
        }
    }

    /// Drain an outbound feed, dispatching each message until the feed
    /// closes or the supervisor is cancelled.
    ///
    /// Delivery errors are logged and skipped; a failing transport must
    /// not stop traffic to the others.
    pub async fn run_outbound_loop(&self, mut rx: mpsc::Receiver<OutboundMessage>) {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = self.dispatch(&msg).await {
                warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    error = %e,
                    "outbound delivery failed"
                );
            }
        }
        info!("outbound dispatch loop exiting");
    }
}
