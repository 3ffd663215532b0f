//! Consumption of one subscription's data channels.
//!
//! A task subscribes to every `<subscription>.<target>` channel and writes
//! each decoded response into the local cache under the subscription name.
//! The prefix also covers the channels of longer subscription names
//! (`sub.` sees `sub.a.<target>`), so a message is applied only when its
//! channel is exactly the one its own target maps to. It runs until the instance is cancelled; a stream that ends is
//! resubscribed.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::notification::codec;
use crate::transport::{data_channel, data_channel_prefix, InboundMessage};

use super::controller::{Syncer, Topic};
use super::types::SyncError;

pub(super) async fn consume(sync: Arc<Syncer>, channel: String) {
    let prefix = data_channel_prefix(&channel);
    let mut applied: u64 = 0;

    loop {
        let Some(mut stream) = sync.subscribe_until_cancelled(Topic::Prefix(&prefix)).await else {
            break;
        };
        debug!(channel = %channel, prefix = %prefix, "channel subscribed");

        loop {
            tokio::select! {
                _ = sync.cancel.cancelled() => {
                    debug!(channel = %channel, applied, "channel task stopped");
                    return;
                }
                msg = stream.next() => match msg {
                    Some(msg) => {
                        if sync.apply_remote(&channel, msg).await {
                            applied += 1;
                        }
                    }
                    None => break,
                }
            }
        }

        warn!(channel = %channel, "data stream ended, resubscribing");
        crate::metrics::record_resubscribe("data");
    }
    debug!(channel = %channel, applied, "channel task stopped");
}

impl Syncer {
    /// Decode one inbound message and write it locally. Returns `true` if
    /// something was applied.
    pub(super) async fn apply_remote(&self, subscription: &str, msg: InboundMessage) -> bool {
        if msg.payload.is_empty() {
            crate::metrics::record_received("empty");
            return false;
        }

        let response = match codec::decode(&msg.payload) {
            Ok(response) => response,
            Err(source) => {
                let err = SyncError::Deserialization { channel: msg.channel, source };
                warn!(error = %err, "dropping message");
                crate::metrics::record_decode_error();
                crate::metrics::record_received("error");
                return false;
            }
        };

        let expected = response
            .target()
            .map(|target| self.transport.inbound_channel(&data_channel(subscription, target)));
        if expected.as_deref() != Some(msg.channel.as_str()) {
            debug!(channel = %msg.channel, subscription, "message belongs to another subscription");
            crate::metrics::record_received("foreign");
            return false;
        }

        if self.debug {
            debug!(channel = %msg.channel, response = ?response, "received");
        }
        self.local.write(subscription, &response).await;
        crate::metrics::record_received("ok");
        true
    }
}
