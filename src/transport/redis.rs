//! Redis pub/sub binding.
//!
//! Publishing goes through a shared [`ConnectionManager`], which reconnects
//! on its own. Every subscription opens a dedicated pub/sub connection, since
//! a Redis connection in subscriber mode cannot issue other commands.
//!
//! Prefix subscriptions use `PSUBSCRIBE` with the prefix glob-escaped, so a
//! subscription name containing `*`, `?` or `[` only ever matches itself.
//!
//! Closing drops the publishing connection. Subscriber connections belong to
//! their streams and go away when the streams are dropped.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo};
use tracing::{debug, info};

use super::{InboundMessage, MessageStream, PubSubTransport, TransportError};

const BACKEND: &str = "redis";

pub struct RedisTransport {
    client: Client,
    /// `None` once closed
    connection: Mutex<Option<ConnectionManager>>,
    address: String,
}

impl RedisTransport {
    /// Connect to `address` (`host:port`) and verify the server with PING.
    pub async fn connect(
        address: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, TransportError> {
        let connection_error = |reason: String| TransportError::Connection {
            backend: BACKEND,
            address: address.to_string(),
            reason,
        };

        let mut info = format!("redis://{}", address)
            .into_connection_info()
            .map_err(|e| connection_error(e.to_string()))?;
        info.redis.username = username.map(String::from);
        info.redis.password = password.map(String::from);

        let client = Client::open(info).map_err(|e| connection_error(e.to_string()))?;
        let mut connection = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        info!(address, pong = %pong, "redis ping ok");

        Ok(Self {
            client,
            connection: Mutex::new(Some(connection)),
            address: address.to_string(),
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// A handle on the shared publishing connection.
    fn connection(&self) -> Result<ConnectionManager, TransportError> {
        self.connection.lock().clone().ok_or(TransportError::Closed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.lock().is_none()
    }

    async fn pubsub(&self, channel: &str) -> Result<redis::aio::PubSub, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| TransportError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Escape Redis glob metacharacters.
pub(crate) fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn into_stream(pubsub: redis::aio::PubSub) -> MessageStream {
    pubsub
        .into_on_message()
        .map(|msg| InboundMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        })
        .boxed()
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut conn = self.connection()?;
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| TransportError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        let mut pubsub = self.pubsub(channel).await?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| TransportError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(into_stream(pubsub))
    }

    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, TransportError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut pubsub = self.pubsub(&pattern).await?;
        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| TransportError::Subscribe {
                channel: pattern.clone(),
                reason: e.to_string(),
            })?;
        Ok(into_stream(pubsub))
    }

    async fn close(&self) {
        let connection = self.connection.lock().take();
        if connection.is_some() {
            drop(connection);
            info!(address = %self.address, "redis transport closed");
        }
    }
}
