//! Construction and shutdown.
//!
//! Construction connects to the configured backend, retrying forever, then
//! spawns the background loops. There is no separate start step: a `Cache`
//! returned by a constructor with a transport is already `Running`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{BackendKind, CacheConfig};
use crate::storage::{InMemoryCache, LocalCache};
use crate::transport::{connect_with_retry, NatsTransport, PubSubTransport, RedisTransport};

use super::controller::Syncer;
use super::{Cache, SyncState};

/// How long `stop` waits for the loops before aborting them
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

impl Cache {
    /// Build a cache with an [`InMemoryCache`] and connect to the configured
    /// backend.
    ///
    /// Does not return until the backend is reachable. With
    /// [`BackendKind::None`] it returns immediately with a local-only cache.
    pub async fn new(config: CacheConfig) -> Self {
        let config = config.with_defaults();
        let local: Arc<dyn LocalCache> = Arc::new(InMemoryCache::with_expiration(config.expiration()));
        Self::connect(config, local).await
    }

    /// Like [`Cache::new`] with a caller-provided local cache.
    pub async fn with_local_cache(config: CacheConfig, local: Arc<dyn LocalCache>) -> Self {
        Self::connect(config.with_defaults(), local).await
    }

    /// Build a cache over an already connected transport. The backend kind in
    /// `config` is ignored. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_transport(config: CacheConfig, local: Arc<dyn LocalCache>, transport: Arc<dyn PubSubTransport>) -> Self {
        Self::build(config.with_defaults(), local, Some(transport))
    }

    /// A cache that never leaves the process.
    #[must_use]
    pub fn local_only(config: CacheConfig, local: Arc<dyn LocalCache>) -> Self {
        Self::build(config.with_defaults(), local, None)
    }

    async fn connect(config: CacheConfig, local: Arc<dyn LocalCache>) -> Self {
        let transport = connect_backend(&config).await;
        Self::build(config, local, transport)
    }

    fn build(config: CacheConfig, local: Arc<dyn LocalCache>, transport: Option<Arc<dyn PubSubTransport>>) -> Self {
        let backend = transport.as_ref().map_or("none", |t| t.backend());
        let span = info_span!("cache", backend);
        let cancel = CancellationToken::new();
        let (state, state_rx) = watch::channel(SyncState::Idle);

        let mut tasks = Vec::new();
        let sync = transport.map(|transport| {
            let (tx, rx) = mpsc::channel(config.request_queue_capacity);
            let sync = Arc::new(Syncer::new(
                transport,
                local.clone(),
                tx,
                cancel.clone(),
                config.write_timeout(),
                config.channel_reset_period(),
                config.debug,
            ));
            tasks = sync.spawn_loops(rx, &span);
            sync
        });

        if sync.is_some() {
            let _ = state.send(SyncState::Running);
            crate::metrics::set_sync_state(SyncState::Running.as_u8());
        }
        span.in_scope(|| {
            info!(
                write_timeout = ?config.write_timeout(),
                reset_period = ?config.channel_reset_period(),
                "cache created"
            );
        });

        Self {
            config,
            local,
            sync,
            cancel,
            state,
            state_rx,
            tasks: Mutex::new(tasks),
            span,
        }
    }

    /// Cancel every loop and channel task, then close the transport.
    ///
    /// Idempotent. The local cache stays readable afterwards.
    pub async fn stop(&self) {
        if self.state() == SyncState::Stopped {
            return;
        }
        self.shutdown().instrument(self.span.clone()).await;
    }

    async fn shutdown(&self) {
        info!("stopping cache");
        self.cancel.cancel();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for mut handle in tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "background loop failed"),
                Err(_) => {
                    warn!("background loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Some(sync) = &self.sync {
            sync.transport.close().await;
            debug!("transport closed");
        }

        let _ = self.state.send(SyncState::Stopped);
        crate::metrics::set_sync_state(SyncState::Stopped.as_u8());
        info!("cache stopped");
    }
}

async fn connect_backend(config: &CacheConfig) -> Option<Arc<dyn PubSubTransport>> {
    let address = config.address.as_deref().unwrap_or_default();
    let username = config.username.as_deref();
    let password = config.password.as_deref();

    match config.backend {
        BackendKind::None => None,
        BackendKind::Redis => {
            let transport: Arc<dyn PubSubTransport> = Arc::new(
                connect_with_retry("redis", || RedisTransport::connect(address, username, password)).await,
            );
            Some(transport)
        }
        BackendKind::Nats => {
            let transport: Arc<dyn PubSubTransport> = Arc::new(
                connect_with_retry("nats", || NatsTransport::connect(address, username, password)).await,
            );
            Some(transport)
        }
    }
}
