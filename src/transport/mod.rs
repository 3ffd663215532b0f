// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pub/sub transport bindings.
//!
//! A binding wraps one live connection to a publish/subscribe backend and
//! does nothing but move bytes: publish to a channel, subscribe to a channel,
//! subscribe to every channel under a prefix, close. The synchronization
//! protocol in [`crate::coordinator`] is written once against
//! [`PubSubTransport`].
//!
//! | Binding | Exact subscribe | Prefix subscribe |
//! |---------|-----------------|------------------|
//! | [`RedisTransport`] | `SUBSCRIBE ch` | `PSUBSCRIBE prefix*` |
//! | [`NatsTransport`] | subject `ch` | subject `prefix>` |
//! | [`MemoryTransport`] | equality | `starts_with` |

pub mod memory;
pub mod nats;
pub mod redis;

pub use self::memory::MemoryTransport;
pub use self::nats::NatsTransport;
pub use self::redis::RedisTransport;

use std::future::Future;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tracing::info;

use crate::resilience::retry::{retry, RetryConfig};

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("failed to connect to {backend} at {address}: {reason}")]
    Connection {
        backend: &'static str,
        address: String,
        reason: String,
    },
    #[error("failed to publish on '{channel}': {reason}")]
    Publish { channel: String, reason: String },
    #[error("failed to subscribe to '{channel}': {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("transport is closed")]
    Closed,
}

/// A message received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete channel the message was published on
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Inbound messages of one subscription. Dropping the stream unsubscribes.
pub type MessageStream = BoxStream<'static, InboundMessage>;

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Short backend name used in logs and metrics
    fn backend(&self) -> &'static str;

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Messages published on exactly `channel`.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError>;

    /// Messages published on any channel starting with `prefix`.
    /// `prefix` ends with [`CHANNEL_SEPARATOR`].
    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, TransportError>;

    /// Close the connection. Later publishes and subscribes fail with
    /// [`TransportError::Closed`].
    async fn close(&self);

    /// The name inbound messages report for something published on `channel`.
    fn inbound_channel(&self, channel: &str) -> String {
        channel.to_string()
    }
}

/// Separates the subscription name from the target name in a data channel.
pub const CHANNEL_SEPARATOR: char = '.';

/// Data channel for one subscription/target pair: `subscription.target`.
#[must_use]
pub fn data_channel(subscription: &str, target: &str) -> String {
    format!("{}{}{}", subscription, CHANNEL_SEPARATOR, target)
}

/// Prefix covering every data channel of a subscription.
#[must_use]
pub fn data_channel_prefix(subscription: &str) -> String {
    format!("{}{}", subscription, CHANNEL_SEPARATOR)
}

/// Connect with the bootstrap policy: log, wait a second, try again, forever.
///
/// This is the only unbounded retry in the crate.
pub async fn connect_with_retry<F, Fut, T>(backend: &'static str, mut connect: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let config = RetryConfig::bootstrap();
    loop {
        let result = retry(&format!("{}_connect", backend), &config, || {
            let attempt = connect();
            async move {
                let res = attempt.await;
                if res.is_err() {
                    crate::metrics::record_connection_error(backend);
                }
                res
            }
        })
        .await;
        match result {
            Ok(transport) => {
                info!(backend, "transport connected");
                return transport;
            }
            // Only reachable with a bounded policy; start over.
            Err(e) => info!(backend, error = %e, "restarting connection bootstrap"),
        }
    }
}
