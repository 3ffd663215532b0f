// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache coordinator.
//!
//! The [`Cache`] is the per-process facade. Reads, subscriptions and target
//! deletion go straight to the [`LocalCache`]; writes go to the local cache
//! and then through the write-through path to the transport. All
//! synchronization logic lives in the submodules:
//!
//! - `write_path`: announce, resolve the data channel, publish with a timeout
//! - `controller`: discovery, epoch and dispatch loops
//! - `channel_task`: one consumer per discovered channel
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Running → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use telemetry_cache::{BackendKind, Cache, CacheConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = CacheConfig {
//!     backend: BackendKind::Redis,
//!     address: Some("127.0.0.1:6379".into()),
//!     ..Default::default()
//! };
//!
//! // Blocks until Redis answers; retries every second meanwhile
//! let cache = Cache::new(config).await;
//! let ctx = CancellationToken::new();
//! # let response = telemetry_cache::SubscribeResponse::sync_response();
//! cache.write(&ctx, "sub1", &response).await;
//!
//! let snapshot = cache.read().await.unwrap();
//! cache.stop().await;
//! # }
//! ```

mod channel_task;
mod controller;
mod lifecycle;
mod types;
mod write_path;

pub use controller::CONTROL_CHANNEL;
pub use types::{CacheStats, SyncError, SyncState};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::notification::Notification;
use crate::storage::traits::{CacheError, CacheNotification, LocalCache, ReadOptions};

use controller::Syncer;

/// A local notification cache kept in sync with its peers.
///
/// # Thread Safety
///
/// `Cache` is `Send + Sync`; share it behind an `Arc`. `write` may be called
/// concurrently from any number of tasks.
pub struct Cache {
    config: CacheConfig,

    local: Arc<dyn LocalCache>,

    /// Synchronization machinery; `None` for a local-only cache
    sync: Option<Arc<Syncer>>,

    /// Shared by every loop and channel task
    cancel: CancellationToken,

    state: watch::Sender<SyncState>,
    state_rx: watch::Receiver<SyncState>,

    /// Discovery, epoch and dispatch loops
    tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Carries the backend name into every log line of this instance
    span: tracing::Span,
}

impl Cache {
    /// Get current sync state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SyncState::Running
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Backend name, `none` when running local-only.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.sync
            .as_ref()
            .map_or("none", |sync| sync.transport.backend())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self.backend(),
            state: self.state(),
            announced_channels: self.sync.as_ref().map_or(0, |s| s.topology.len()),
            started_channels: self.sync.as_ref().map_or(0, |s| s.started_count()),
        }
    }

    /// The underlying local cache.
    #[must_use]
    pub fn local_cache(&self) -> &Arc<dyn LocalCache> {
        &self.local
    }

    /// Current contents of the local cache.
    pub async fn read(&self) -> Result<HashMap<String, Vec<Notification>>, CacheError> {
        self.local.read().await
    }

    /// Stream notifications from the local cache. The stream ends when `ctx`
    /// is cancelled or the receiver is dropped.
    pub fn subscribe(&self, ctx: CancellationToken, opts: ReadOptions) -> mpsc::Receiver<CacheNotification> {
        self.local.subscribe(ctx, opts)
    }

    /// Remove everything cached for `target`. Local only.
    pub async fn delete_target(&self, target: &str) {
        self.local.delete_target(target).await;
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        // No background task outlives the instance, even without stop().
        self.cancel.cancel();
    }
}
