//! Write-through path.
//!
//! # Order
//!
//! 1. Write to the local cache (always, unconditionally)
//! 2. First sighting of the subscription in this epoch: announce it on
//!    [`CONTROL_CHANNEL`]
//! 3. Resolve the target from the notification prefix; no target, no publish
//! 4. Make sure this instance consumes the subscription's channels
//! 5. Publish the encoded response on `<subscription>.<target>`
//!
//! Every publish is bounded by the configured write timeout and by the
//! caller's token. Failures after step 1 are logged and never returned.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::notification::{codec, SubscribeResponse};
use crate::transport::data_channel;

use super::controller::{Syncer, CONTROL_CHANNEL};
use super::types::SyncError;
use super::Cache;

impl Cache {
    /// Store `response` under `subscription` and propagate it to peers.
    ///
    /// Returns once the local write is done and the publication either
    /// finished, timed out, or was abandoned because `ctx` was cancelled.
    pub async fn write(&self, ctx: &CancellationToken, subscription: &str, response: &SubscribeResponse) {
        self.local.write(subscription, response).await;

        if let Some(sync) = &self.sync {
            if !self.cancel.is_cancelled() {
                sync.propagate(ctx, subscription, response).await;
            }
        }
    }
}

impl Syncer {
    pub(super) async fn propagate(&self, ctx: &CancellationToken, subscription: &str, response: &SubscribeResponse) {
        if self.topology.mark_announced(subscription) {
            let result = self
                .publish_bounded(ctx, CONTROL_CHANNEL, subscription.as_bytes().to_vec())
                .await;
            match result {
                Ok(()) => {
                    debug!(subscription, "subscription announced");
                    crate::metrics::record_announcement();
                    crate::metrics::record_publish("control", "success");
                }
                Err(e) => {
                    warn!(subscription, error = %e, "failed to announce subscription");
                    crate::metrics::record_publish("control", e.status());
                }
            }
        }

        let Some(target) = response.target() else {
            if response.notification().is_some() {
                let err = SyncError::MissingTarget { subscription: subscription.to_string() };
                warn!(error = %err, "not propagating notification");
                crate::metrics::record_missing_target();
            } else {
                debug!(subscription, "non-update response kept local");
            }
            return;
        };

        self.request_channel_bounded(ctx, subscription).await;

        let channel = data_channel(subscription, target);
        let result = match codec::encode(response) {
            Ok(payload) => self.publish_bounded(ctx, &channel, payload).await,
            Err(e) => Err(SyncError::Encode(e)),
        };
        match result {
            Ok(()) => {
                if self.debug {
                    debug!(channel = %channel, "published");
                }
                crate::metrics::record_publish("data", "success");
            }
            Err(e) => {
                warn!(subscription, target, error = %e, "failed to publish notification");
                crate::metrics::record_publish("data", e.status());
            }
        }
    }

    /// Publish racing the write timeout, the caller's token and the instance
    /// token. Cancellation wins ties.
    async fn publish_bounded(&self, ctx: &CancellationToken, channel: &str, payload: Vec<u8>) -> Result<(), SyncError> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(SyncError::Cancelled),
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            res = tokio::time::timeout(self.write_timeout, self.transport.publish(channel, payload)) => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SyncError::Publish(e)),
                Err(_) => Err(SyncError::PublishTimeout {
                    channel: channel.to_string(),
                    timeout: self.write_timeout,
                }),
            },
        }
    }
}
