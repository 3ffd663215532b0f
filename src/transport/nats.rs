//! NATS binding.
//!
//! Channels map onto subjects. A data channel `sub.target` is already a
//! two-token subject, and a prefix subscription on `sub.` becomes the
//! wildcard subject `sub.>`, which matches every target under it.
//!
//! Whitespace and the wildcard characters `*` / `>` are not allowed inside
//! subject tokens and are replaced with `_`; publish and subscribe apply the
//! same mapping so both sides agree.
//!
//! Closing flushes and drops the client; the connection ends once the
//! subscriber streams are gone too.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{InboundMessage, MessageStream, PubSubTransport, TransportError, CHANNEL_SEPARATOR};

const BACKEND: &str = "nats";
const CLIENT_NAME: &str = "telemetry-cache";

pub struct NatsTransport {
    /// `None` once closed
    client: Mutex<Option<async_nats::Client>>,
    address: String,
}

impl NatsTransport {
    pub async fn connect(
        address: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, TransportError> {
        let mut options = async_nats::ConnectOptions::new().name(CLIENT_NAME);
        if let Some((user, pass)) = credentials(username, password) {
            options = options.user_and_password(user, pass);
        }

        let client = options
            .connect(address)
            .await
            .map_err(|e| TransportError::Connection {
                backend: BACKEND,
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        info!(address, "nats connected");

        Ok(Self {
            client: Mutex::new(Some(client)),
            address: address.to_string(),
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// A handle on the client; clones share one connection.
    fn client(&self) -> Result<async_nats::Client, TransportError> {
        self.client.lock().clone().ok_or(TransportError::Closed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.lock().is_none()
    }

    async fn subscribe_subject(&self, subject: String) -> Result<MessageStream, TransportError> {
        let subscriber = self
            .client()?
            .subscribe(subject.clone())
            .await
            .map_err(|e| TransportError::Subscribe {
                channel: subject,
                reason: e.to_string(),
            })?;
        Ok(subscriber
            .map(|msg| InboundMessage {
                channel: msg.subject.to_string(),
                payload: msg.payload.to_vec(),
            })
            .boxed())
    }
}

/// User/password pair, if both halves are set. Half a pair is ignored with a
/// warning.
fn credentials(username: Option<&str>, password: Option<&str>) -> Option<(String, String)> {
    match (username, password) {
        (Some(user), Some(pass)) => Some((user.to_string(), pass.to_string())),
        (None, None) => None,
        (Some(_), None) => {
            warn!("nats username set without a password, connecting without credentials");
            None
        }
        (None, Some(_)) => {
            warn!("nats password set without a username, connecting without credentials");
            None
        }
    }
}

/// Map a channel name onto a valid subject.
pub(crate) fn subject_for(channel: &str) -> String {
    channel
        .chars()
        .map(|c| if c.is_whitespace() || c == '*' || c == '>' { '_' } else { c })
        .collect()
}

/// Wildcard subject matching everything under `prefix`.
pub(crate) fn wildcard_for(prefix: &str) -> String {
    let mut subject = subject_for(prefix);
    if !subject.ends_with(CHANNEL_SEPARATOR) {
        subject.push(CHANNEL_SEPARATOR);
    }
    subject.push('>');
    subject
}

#[async_trait]
impl PubSubTransport for NatsTransport {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.client()?;
        let subject = subject_for(channel);
        let publish_error = |reason: String| TransportError::Publish {
            channel: channel.to_string(),
            reason,
        };

        client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| publish_error(e.to_string()))?;
        // Errors must surface within the caller's write timeout
        client
            .flush()
            .await
            .map_err(|e| publish_error(e.to_string()))?;
        debug!(subject = %subject, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        self.subscribe_subject(subject_for(channel)).await
    }

    fn inbound_channel(&self, channel: &str) -> String {
        subject_for(channel)
    }

    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, TransportError> {
        self.subscribe_subject(wildcard_for(prefix)).await
    }

    async fn close(&self) {
        let Some(client) = self.client.lock().take() else {
            return;
        };
        if let Err(e) = client.flush().await {
            warn!(error = %e, "failed to flush nats client on close");
        }
        drop(client);
        info!(address = %self.address, "nats transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for_replaces_invalid_characters() {
        assert_eq!(subject_for("sub1.router1"), "sub1.router1");
        assert_eq!(subject_for("my sub.r*1>"), "my_sub.r_1_");
    }

    #[test]
    fn test_credentials_need_both_halves() {
        assert_eq!(credentials(Some("u"), Some("p")), Some(("u".to_string(), "p".to_string())));
        assert_eq!(credentials(Some("u"), None), None);
        assert_eq!(credentials(None, Some("p")), None);
        assert_eq!(credentials(None, None), None);
    }

    #[test]
    fn test_wildcard_for_prefix() {
        assert_eq!(wildcard_for("sub1."), "sub1.>");
        assert_eq!(wildcard_for("sub1"), "sub1.>");
    }
}
