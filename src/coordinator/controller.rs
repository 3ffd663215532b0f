//! Background loops shared by every channel of one cache instance.
//!
//! ```text
//!   write path ──┐
//!                ├──► requests (mpsc) ──► dispatch loop ──► channel tasks
//!   discovery ───┘                         (StartedChannels)
//!      ▲
//!      └── control channel
//!
//!   epoch loop: every channel_reset_period, TopologySet::reset()
//! ```
//!
//! All loops select on the instance cancellation token and exit when it
//! fires. The dispatch loop owns the channel tasks and joins them on exit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::LocalCache;
use crate::topology::{StartedChannels, TopologySet};
use crate::transport::{InboundMessage, MessageStream, PubSubTransport};

use super::channel_task;

/// Well-known channel on which subscription names are announced.
pub const CONTROL_CHANNEL: &str = "telemetry_cache_channels";

/// What a subscription listens to.
#[derive(Debug, Clone, Copy)]
pub(super) enum Topic<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

/// State shared by the write path, the loops and the channel tasks.
pub(super) struct Syncer {
    pub(super) transport: Arc<dyn PubSubTransport>,
    pub(super) local: Arc<dyn LocalCache>,
    pub(super) topology: TopologySet,
    pub(super) requests: mpsc::Sender<String>,
    pub(super) cancel: CancellationToken,
    pub(super) write_timeout: Duration,
    pub(super) reset_period: Duration,
    pub(super) debug: bool,
    started: AtomicUsize,
}

impl Syncer {
    pub(super) fn new(
        transport: Arc<dyn PubSubTransport>,
        local: Arc<dyn LocalCache>,
        requests: mpsc::Sender<String>,
        cancel: CancellationToken,
        write_timeout: Duration,
        reset_period: Duration,
        debug: bool,
    ) -> Self {
        Self {
            transport,
            local,
            topology: TopologySet::new(),
            requests,
            cancel,
            write_timeout,
            reset_period,
            debug,
            started: AtomicUsize::new(0),
        }
    }

    pub(super) fn started_count(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    /// Spawn the discovery, epoch and dispatch loops inside `span`.
    pub(super) fn spawn_loops(
        self: &Arc<Self>,
        requests: mpsc::Receiver<String>,
        span: &Span,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().discovery_loop().instrument(span.clone())),
            tokio::spawn(self.clone().epoch_loop().instrument(span.clone())),
            tokio::spawn(self.clone().dispatch_loop(requests, span.clone()).instrument(span.clone())),
        ]
    }

    /// Ask the dispatch loop to make sure `channel` is consumed.
    ///
    /// Waits for room in the request queue; gives up when `ctx` or the
    /// instance is cancelled.
    pub(super) async fn request_channel(&self, ctx: &CancellationToken, channel: &str) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = ctx.cancelled() => false,
            res = self.requests.send(channel.to_string()) => res.is_ok(),
        }
    }

    /// [`Self::request_channel`] for writers: waits at most `write_timeout`.
    pub(super) async fn request_channel_bounded(&self, ctx: &CancellationToken, channel: &str) -> bool {
        match tokio::time::timeout(self.write_timeout, self.request_channel(ctx, channel)).await {
            Ok(sent) => sent,
            Err(_) => {
                warn!(channel, timeout = ?self.write_timeout, "channel request queue full, dropping request");
                crate::metrics::record_request_dropped();
                false
            }
        }
    }

    /// Subscribe, retrying with backoff until it works or the instance is
    /// cancelled.
    pub(super) async fn subscribe_until_cancelled(&self, topic: Topic<'_>) -> Option<MessageStream> {
        let name = match topic {
            Topic::Exact(channel) => format!("subscribe {}", channel),
            Topic::Prefix(prefix) => format!("psubscribe {}", prefix),
        };
        let attempt = move || async move {
            match topic {
                Topic::Exact(channel) => self.transport.subscribe(channel).await,
                Topic::Prefix(prefix) => self.transport.subscribe_prefix(prefix).await,
            }
        };

        let policy = RetryConfig::daemon();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            res = retry(&name, &policy, attempt) => res.ok(),
        }
    }

    /// Listen for announcements and turn every name into a channel request.
    async fn discovery_loop(self: Arc<Self>) {
        info!("starting sync");
        loop {
            let Some(mut stream) = self.subscribe_until_cancelled(Topic::Exact(CONTROL_CHANNEL)).await else {
                break;
            };
            debug!(channel = CONTROL_CHANNEL, "listening for announcements");

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!("discovery loop stopped");
                        return;
                    }
                    msg = stream.next() => match msg {
                        Some(msg) => self.on_announcement(msg).await,
                        None => break,
                    }
                }
            }

            warn!(channel = CONTROL_CHANNEL, "control stream ended, resubscribing");
            crate::metrics::record_resubscribe("control");
        }
        debug!("discovery loop stopped");
    }

    async fn on_announcement(&self, msg: InboundMessage) {
        let name = match String::from_utf8(msg.payload) {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "ignoring non-UTF-8 announcement");
                return;
            }
        };
        if self.debug {
            debug!(subscription = %name, "announcement received");
        }
        self.request_channel(&self.cancel, &name).await;
    }

    /// Periodically forget what was announced, so late joiners hear about
    /// every active subscription within one period.
    async fn epoch_loop(self: Arc<Self>) {
        let period = self.reset_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let cleared = self.topology.len();
                    self.topology.reset();
                    debug!(cleared, "topology reset, subscriptions will be re-announced");
                    crate::metrics::record_topology_reset(cleared);
                }
            }
        }
        debug!("epoch loop stopped");
    }

    /// Start one consumption task per distinct channel name.
    async fn dispatch_loop(self: Arc<Self>, mut requests: mpsc::Receiver<String>, span: Span) {
        let mut started = StartedChannels::new();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                req = requests.recv() => {
                    let Some(channel) = req else {
                        // Senders live as long as the Syncer; wait for shutdown.
                        self.cancel.cancelled().await;
                        break;
                    };
                    if !started.mark_started(&channel) {
                        continue;
                    }
                    info!(channel = %channel, "starting channel sync");
                    self.started.store(started.len(), Ordering::Relaxed);
                    crate::metrics::record_channel_started(started.len());
                    tasks.spawn(channel_task::consume(self.clone(), channel).instrument(span.clone()));
                }
            }
        }

        // Every task watches the same token
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "channel task failed");
            }
        }
        debug!(channels = started.len(), "dispatch loop stopped");
    }
}
