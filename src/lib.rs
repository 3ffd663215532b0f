//! # Telemetry Cache
//!
//! A local telemetry notification cache that stays in sync across processes
//! over a publish/subscribe backend (Redis or NATS).
//!
//! ## Architecture
//!
//! Each process owns a full local cache. Writes land locally first, then
//! fan out to peers; peers learn which subscriptions exist from a control
//! channel and consume their data channels.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Cache::write()                          │
//! │  • Local write, always                                     │
//! │  • Announce subscription once per epoch (control channel)  │
//! │  • Publish on <subscription>.<target>                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                      (PubSubTransport)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Redis / NATS / memory                     │
//! │  • telemetry_cache_channels: subscription names            │
//! │  • sub.target: encoded notifications                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (discovery + dispatch loops)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Channel tasks on every peer                    │
//! │  • One per subscription, prefix-subscribed to sub.*        │
//! │  • Decode, write into the peer's LocalCache                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is best effort: a peer that was not yet subscribed misses
//! what was published before. The topology is reset every
//! `channel_reset_secs`, so every live subscription is re-announced and
//! late joiners catch up on subsequent writes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use telemetry_cache::notification::{Notification, Path, TypedValue, Update};
//! use telemetry_cache::{BackendKind, Cache, CacheConfig, SubscribeResponse};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CacheConfig {
//!         backend: BackendKind::Nats,
//!         ..Default::default()
//!     };
//!     let cache = Cache::new(config).await;
//!
//!     let response = SubscribeResponse::update(Notification {
//!         timestamp: 1,
//!         prefix: Some(Path::with_target("router1")),
//!         update: vec![Update::new(
//!             "interface[name=ethernet-1/1]/description".parse().unwrap(),
//!             TypedValue::AsciiVal("uplink".into()),
//!         )],
//!         ..Default::default()
//!     });
//!     cache.write(&CancellationToken::new(), "sub1", &response).await;
//!
//!     for (subscription, notifications) in cache.read().await.unwrap() {
//!         println!("{subscription}: {} targets", notifications.len());
//!     }
//!
//!     cache.stop().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`Cache`] facade and the synchronization loops
//! - [`transport`]: Redis, NATS and in-process bindings
//! - [`storage`]: the local cache contract and [`InMemoryCache`]
//! - [`notification`]: envelope types, paths and the wire codec
//! - [`topology`]: announced and started channel sets
//! - [`resilience`]: retry policies
//! - [`logging`]: optional subscriber installation

pub mod config;
pub mod coordinator;
pub mod logging;
pub mod metrics;
pub mod notification;
pub mod resilience;
pub mod storage;
pub mod topology;
pub mod transport;

pub use config::{BackendKind, CacheConfig};
pub use coordinator::{Cache, CacheStats, SyncError, SyncState, CONTROL_CHANNEL};
pub use notification::codec::CodecError;
pub use notification::{Notification, Path, SubscribeResponse};
pub use resilience::retry::RetryConfig;
pub use storage::{CacheError, CacheNotification, InMemoryCache, LocalCache, ReadMode, ReadOptions};
pub use transport::{InboundMessage, MemoryTransport, NatsTransport, PubSubTransport, RedisTransport, TransportError};
