//! Message bus for channel↔agent communication.
//!
//! A thread-safe [`MessageBus`] with a bounded single-consumer inbound
//! queue and a fan-out outbound broadcast. Each outbound subscriber gets
//! its own buffered queue; a full buffer drops the message for that
//! subscriber only, so one slow transport never blocks the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_types::error::{ErrorCode, Result, TetherError};
use tether_types::event::{InboundMessage, OutboundMessage};

/// Default capacity of the inbound and outbound queues.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default buffer size for each outbound subscription.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 100;

/// A live outbound subscription.
///
/// Dropping the subscription without calling
/// [`MessageBus::unsubscribe_outbound`] leaves a dead sender in the bus
/// until the next publish notices the closed channel.
pub struct Subscription {
    /// Unique subscription id, used to unsubscribe.
    pub id: u64,

    /// Read side of the subscription buffer.
    pub rx: mpsc::Receiver<OutboundMessage>,
}

type SubscriberMap = HashMap<u64, mpsc::Sender<OutboundMessage>>;

/// In-process pub/sub decoupling transports from the agent core.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    subscribers: Arc<std::sync::Mutex<SubscriberMap>>,
    next_sub_id: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl MessageBus {
    /// Create a bus with the default queue capacity and start the
    /// broadcaster task.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a bus with a custom queue capacity.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let bus = Arc::new(Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            subscribers: Arc::new(std::sync::Mutex::new(HashMap::new())),
            next_sub_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(Self::broadcast_loop(
            outbound_rx,
            bus.subscribers.clone(),
            bus.cancel.clone(),
        ));

        debug!(capacity, "message bus created");
        bus
    }

    /// Publish an inbound message, waiting while the queue is full.
    ///
    /// Assigns `id` and leaves `timestamp` alone (the serde default set it
    /// at construction when the transport omitted one). Fails with
    /// [`ErrorCode::BusClosed`] after [`close`](Self::close).
    pub async fn publish_inbound(&self, mut msg: InboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TetherError::new(ErrorCode::BusClosed, "bus is closed"));
        }

        if msg.id.is_empty() {
            msg.id = uuid::Uuid::new_v4().to_string();
        }

        debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            id = %msg.id,
            "publishing inbound message"
        );

        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| TetherError::new(ErrorCode::BusClosed, "inbound queue closed"))
    }

    /// Consume the next inbound message.
    ///
    /// Single-consumer semantics: the router holds this end. Returns
    /// `None` once the bus is closed and drained.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Publish an outbound message into the broadcast queue.
    pub async fn publish_outbound(&self, mut msg: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TetherError::new(ErrorCode::BusClosed, "bus is closed"));
        }

        if msg.id.is_empty() {
            msg.id = uuid::Uuid::new_v4().to_string();
        }

        debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            "publishing outbound message"
        );

        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| TetherError::new(ErrorCode::BusClosed, "outbound queue closed"))
    }

    /// Create a new outbound subscription with the default buffer.
    pub fn subscribe_outbound(&self) -> Subscription {
        self.subscribe_outbound_with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Create a new outbound subscription with an explicit buffer size.
    ///
    /// Messages published after this call are attempted on the
    /// subscription; a full buffer drops the message for this subscriber
    /// only.
    pub fn subscribe_outbound_with_capacity(&self, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .insert(id, tx);
        debug!(subscription = id, capacity, "outbound subscription created");
        Subscription { id, rx }
    }

    /// Remove and close an outbound subscription.
    pub fn unsubscribe_outbound(&self, id: u64) {
        let removed = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .remove(&id);
        if removed.is_some() {
            debug!(subscription = id, "outbound subscription removed");
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .len()
    }

    /// Close the bus. Idempotent.
    ///
    /// Subsequent publishes fail with [`ErrorCode::BusClosed`]; the
    /// inbound consumer drains buffered messages and then sees `None`;
    /// all subscription channels close.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing message bus");
        self.cancel.cancel();
        self.inbound_rx.lock().await.close();
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .clear();
    }

    /// Single-threaded fan-out: strict FIFO per subscription, identical
    /// ordering across subscriptions except for per-subscriber drops.
    async fn broadcast_loop(
        mut outbound_rx: mpsc::Receiver<OutboundMessage>,
        subscribers: Arc<std::sync::Mutex<SubscriberMap>>,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let targets: Vec<(u64, mpsc::Sender<OutboundMessage>)> = {
                let subs = subscribers.lock().expect("subscriber lock poisoned");
                subs.iter().map(|(id, tx)| (*id, tx.clone())).collect()
            };

            if targets.is_empty() {
                warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    "no outbound subscribers, dropping message"
                );
                continue;
            }

            let mut dead = Vec::new();
            for (id, tx) in &targets {
                match tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            subscription = id,
                            channel = %msg.channel,
                            "subscriber buffer full, dropping message for this subscriber"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(*id);
                    }
                }
            }

            if !dead.is_empty() {
                let mut subs = subscribers.lock().expect("subscriber lock poisoned");
                for id in dead {
                    subs.remove(&id);
                    debug!(subscription = id, "removed closed subscription");
                }
            }
        }
        debug!("broadcast loop exiting");
    }
}
