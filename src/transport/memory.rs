//! In-process binding.
//!
//! All handles created from one [`MemoryTransport`] via [`MemoryTransport::peer`]
//! share a broadcast bus, which makes it possible to run several cache
//! instances in one process and watch them converge. Like real pub/sub it
//! keeps no history: a subscriber only sees what is published after it
//! subscribed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use super::{InboundMessage, MessageStream, PubSubTransport, TransportError};

const BUS_CAPACITY: usize = 4096;

struct Bus {
    tx: broadcast::Sender<InboundMessage>,
    /// Every message ever published, for inspection in tests
    log: Mutex<Vec<InboundMessage>>,
}

#[derive(Clone)]
pub struct MemoryTransport {
    bus: Arc<Bus>,
    closed: Arc<AtomicBool>,
}

enum Filter {
    Exact(String),
    Prefix(String),
}

impl Filter {
    fn matches(&self, channel: &str) -> bool {
        match self {
            Self::Exact(c) => c == channel,
            Self::Prefix(p) => channel.starts_with(p.as_str()),
        }
    }
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            bus: Arc::new(Bus { tx, log: Mutex::new(Vec::new()) }),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another handle on the same bus, with its own open/closed state.
    #[must_use]
    pub fn peer(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// All messages published on the bus so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<InboundMessage> {
        self.bus.log.lock().clone()
    }

    /// Messages published on exactly `channel`.
    #[must_use]
    pub fn published_on(&self, channel: &str) -> Vec<InboundMessage> {
        self.bus
            .log
            .lock()
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    /// Open subscriptions on the bus, across all peers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.bus.tx.receiver_count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stream(&self, filter: Filter) -> Result<MessageStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let rx = self.bus.tx.subscribe();
        let closed = self.closed.clone();
        let stream = futures::stream::unfold((rx, filter, closed), |(mut rx, filter, closed)| async move {
            loop {
                if closed.load(Ordering::Acquire) {
                    return None;
                }
                match rx.recv().await {
                    Ok(msg) if filter.matches(&msg.channel) => return Some((msg, (rx, filter, closed))),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let msg = InboundMessage { channel: channel.to_string(), payload };
        self.bus.log.lock().push(msg.clone());
        // No subscribers is not an error for pub/sub
        let _ = self.bus.tx.send(msg);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        self.stream(Filter::Exact(channel.to_string()))
    }

    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, TransportError> {
        self.stream(Filter::Prefix(prefix.to_string()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
