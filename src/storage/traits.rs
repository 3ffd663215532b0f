use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::notification::{Notification, Path, SubscribeResponse};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache read failed: {0}")]
    Read(String),
}

/// How a subscription on the local cache behaves once the snapshot is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Send the current contents, then close the stream
    #[default]
    Once,
    /// Keep streaming new writes until cancelled
    Stream,
}

/// Filters for [`LocalCache::subscribe`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Only this subscription (None = all)
    pub subscription: Option<String>,
    /// Only this target (None or "*" = all)
    pub target: Option<String>,
    /// Only updates under one of these paths (empty = all)
    pub paths: Vec<Path>,
    pub mode: ReadMode,
    /// In stream mode, skip the initial snapshot
    pub updates_only: bool,
}

/// A notification delivered to a local subscriber, tagged with the
/// subscription it was cached under.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheNotification {
    pub subscription: String,
    pub notification: Notification,
}

impl ReadOptions {
    #[must_use]
    pub fn matches_subscription(&self, subscription: &str) -> bool {
        self.subscription.as_deref().map_or(true, |s| s == subscription)
    }

    #[must_use]
    pub fn matches_target(&self, target: &str) -> bool {
        match self.target.as_deref() {
            None | Some("*") | Some("") => true,
            Some(t) => t == target,
        }
    }

    #[must_use]
    pub fn matches_path(&self, path: &Path) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|p| p.is_prefix_of(path))
    }
}

/// The per-instance authoritative store of notifications.
///
/// The sync layer treats it as a black box: it writes what it receives,
/// and the facade forwards reads, subscriptions and target deletion verbatim.
/// Writing the same response twice must be harmless.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn write(&self, subscription: &str, response: &SubscribeResponse);

    /// Current contents: subscription name → notifications.
    async fn read(&self) -> Result<HashMap<String, Vec<Notification>>, CacheError>;

    /// Stream notifications matching `opts` until `cancel` fires or the
    /// receiver is dropped.
    fn subscribe(&self, cancel: CancellationToken, opts: ReadOptions) -> mpsc::Receiver<CacheNotification>;

    async fn delete_target(&self, target: &str);
}
