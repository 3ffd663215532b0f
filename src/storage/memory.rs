use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::traits::{CacheError, CacheNotification, LocalCache, ReadMode, ReadOptions};
use crate::notification::{Notification, Path, SubscribeResponse, Update};

const SUBSCRIBER_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct CachedUpdate {
    update: Update,
    written_at: Instant,
}

#[derive(Debug, Default)]
struct TargetState {
    origin: String,
    timestamp: i64,
    /// Keyed by the rendered full path, so reads come out sorted
    paths: BTreeMap<String, CachedUpdate>,
}

/// Last-write-wins notification store.
///
/// Layout is subscription → target → path. Each path keeps only its latest
/// update, so applying the same notification twice leaves the cache unchanged.
pub struct InMemoryCache {
    data: DashMap<String, HashMap<String, TargetState>>,
    expiration: Option<Duration>,
    events: broadcast::Sender<CacheNotification>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_expiration(None)
    }

    #[must_use]
    pub fn with_expiration(expiration: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            data: DashMap::new(),
            expiration,
            events,
        }
    }

    /// Number of subscriptions with cached data
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    fn is_expired(&self, entry: &CachedUpdate) -> bool {
        self.expiration
            .map_or(false, |ttl| entry.written_at.elapsed() > ttl)
    }

    fn prune_expired(&self) {
        if self.expiration.is_none() {
            return;
        }
        for mut sub in self.data.iter_mut() {
            for state in sub.value_mut().values_mut() {
                state.paths.retain(|_, entry| !self.is_expired(entry));
            }
            sub.value_mut().retain(|_, state| !state.paths.is_empty());
        }
        self.data.retain(|_, targets| !targets.is_empty());
    }

    fn apply(&self, subscription: &str, notification: &Notification) {
        let target = notification.target().unwrap_or_default().to_string();
        let prefix = notification.prefix.clone().unwrap_or_default();

        let mut targets = self.data.entry(subscription.to_string()).or_default();
        let state = targets.entry(target).or_default();
        if !prefix.origin.is_empty() {
            state.origin = prefix.origin.clone();
        }
        state.timestamp = state.timestamp.max(notification.timestamp);

        for deleted in &notification.delete {
            let full = prefix.join(deleted);
            state.paths.retain(|_, entry| !full.is_prefix_of(&entry.update.path));
        }

        let now = Instant::now();
        for update in &notification.update {
            let full = prefix.join(&update.path);
            state.paths.insert(
                full.to_string(),
                CachedUpdate {
                    update: Update { path: full, ..update.clone() },
                    written_at: now,
                },
            );
        }
    }

    /// Current contents as per-target notifications, filtered by `opts`.
    fn snapshot(&self, opts: &ReadOptions) -> Vec<CacheNotification> {
        self.prune_expired();

        let mut out = Vec::new();
        for sub in self.data.iter() {
            if !opts.matches_subscription(sub.key()) {
                continue;
            }
            let mut targets: Vec<_> = sub.value().iter().collect();
            targets.sort_by(|a, b| a.0.cmp(b.0));

            for (target, state) in targets {
                if !opts.matches_target(target) {
                    continue;
                }
                let update: Vec<Update> = state
                    .paths
                    .values()
                    .filter(|entry| opts.matches_path(&entry.update.path))
                    .map(|entry| entry.update.clone())
                    .collect();
                if update.is_empty() {
                    continue;
                }
                out.push(CacheNotification {
                    subscription: sub.key().clone(),
                    notification: Notification {
                        timestamp: state.timestamp,
                        prefix: target_prefix(&state.origin, target),
                        update,
                        ..Default::default()
                    },
                });
            }
        }
        out
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn target_prefix(origin: &str, target: &str) -> Option<Path> {
    if origin.is_empty() && target.is_empty() {
        return None;
    }
    Some(Path {
        origin: origin.to_string(),
        target: target.to_string(),
        ..Default::default()
    })
}

/// Narrow a live notification to what the subscriber asked for.
fn filter_event(opts: &ReadOptions, event: CacheNotification) -> Option<CacheNotification> {
    if !opts.matches_subscription(&event.subscription) {
        return None;
    }
    let n = &event.notification;
    if !opts.matches_target(n.target().unwrap_or_default()) {
        return None;
    }
    if opts.paths.is_empty() {
        return Some(event);
    }

    let prefix = n.prefix.clone().unwrap_or_default();
    let update: Vec<Update> = n
        .update
        .iter()
        .filter(|u| opts.matches_path(&prefix.join(&u.path)))
        .cloned()
        .collect();
    let delete: Vec<Path> = n
        .delete
        .iter()
        .filter(|d| opts.matches_path(&prefix.join(d)))
        .cloned()
        .collect();
    if update.is_empty() && delete.is_empty() {
        return None;
    }
    Some(CacheNotification {
        subscription: event.subscription,
        notification: Notification { update, delete, ..n.clone() },
    })
}

#[async_trait]
impl LocalCache for InMemoryCache {
    async fn write(&self, subscription: &str, response: &SubscribeResponse) {
        let Some(notification) = response.notification() else {
            debug!(subscription, "not caching non-update response");
            return;
        };
        if notification.is_empty() {
            return;
        }
        self.apply(subscription, notification);
        // No receivers is fine
        let _ = self.events.send(CacheNotification {
            subscription: subscription.to_string(),
            notification: notification.clone(),
        });
    }

    async fn read(&self) -> Result<HashMap<String, Vec<Notification>>, CacheError> {
        let mut out: HashMap<String, Vec<Notification>> = HashMap::new();
        for n in self.snapshot(&ReadOptions::default()) {
            out.entry(n.subscription).or_default().push(n.notification);
        }
        Ok(out)
    }

    fn subscribe(&self, cancel: CancellationToken, opts: ReadOptions) -> mpsc::Receiver<CacheNotification> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        // Subscribe to live events before taking the snapshot so nothing
        // written in between is lost.
        let events = (opts.mode == ReadMode::Stream).then(|| self.events.subscribe());
        let snapshot = if opts.mode == ReadMode::Stream && opts.updates_only {
            Vec::new()
        } else {
            self.snapshot(&opts)
        };

        tokio::spawn(async move {
            for n in snapshot {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(n) => if sent.is_err() { return },
                }
            }
            let Some(mut events) = events else {
                return;
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Some(n) = filter_event(&opts, event) {
                                if tx.send(n).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "local subscriber lagging, notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        rx
    }

    async fn delete_target(&self, target: &str) {
        for mut sub in self.data.iter_mut() {
            sub.value_mut().remove(target);
        }
        self.data.retain(|_, targets| !targets.is_empty());
    }
}
