// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the telemetry cache.
//!
//! # Example
//!
//! ```
//! use telemetry_cache::{BackendKind, CacheConfig};
//!
//! // Local-only cache (no synchronization)
//! let config = CacheConfig::default().with_defaults();
//! assert_eq!(config.backend, BackendKind::None);
//!
//! // Redis-synchronized cache, address defaulted
//! let config = CacheConfig {
//!     backend: BackendKind::Redis,
//!     ..Default::default()
//! }
//! .with_defaults();
//! assert_eq!(config.address.as_deref(), Some("127.0.0.1:6379"));
//! ```

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Default Redis endpoint when none is configured.
pub const DEFAULT_REDIS_ADDRESS: &str = "127.0.0.1:6379";

/// Default NATS endpoint when none is configured.
pub const DEFAULT_NATS_ADDRESS: &str = "127.0.0.1:4222";

/// Which pub/sub backend keeps the instances in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local cache only, nothing is propagated
    #[default]
    None,
    /// Redis PUBLISH / SUBSCRIBE / PSUBSCRIBE
    Redis,
    /// NATS subjects with wildcard subscriptions
    Nats,
}

impl BackendKind {
    /// Default `host:port` for this backend, if it has one.
    #[must_use]
    pub fn default_address(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Redis => Some(DEFAULT_REDIS_ADDRESS),
            Self::Nats => Some(DEFAULT_NATS_ADDRESS),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Redis => "redis",
            Self::Nats => "nats",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a cache instance.
///
/// All fields have sensible defaults. Call [`CacheConfig::with_defaults`]
/// once to fill in backend-dependent values; [`crate::Cache::new`] does this
/// for you and never touches the config again.
#[derive(Clone, Deserialize)]
pub struct CacheConfig {
    /// Synchronization backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Backend endpoint as `host:port`
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Upper bound on a single publish (default: 10s)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Epoch period after which announced channels are forgotten and
    /// re-announced on the next write (default: 60s)
    #[serde(default = "default_channel_reset_secs")]
    pub channel_reset_secs: u64,

    /// Capacity of the channel-request queue feeding the dispatcher
    #[serde(default = "default_request_queue_capacity")]
    pub request_queue_capacity: usize,

    /// Local entries older than this are dropped on read (None = keep forever)
    #[serde(default)]
    pub expiration_secs: Option<u64>,

    /// Log every received message
    #[serde(default)]
    pub debug: bool,
}

fn default_write_timeout_ms() -> u64 { 10_000 }
fn default_channel_reset_secs() -> u64 { 60 }
fn default_request_queue_capacity() -> usize { 1024 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::None,
            address: None,
            username: None,
            password: None,
            write_timeout_ms: default_write_timeout_ms(),
            channel_reset_secs: default_channel_reset_secs(),
            request_queue_capacity: default_request_queue_capacity(),
            expiration_secs: None,
            debug: false,
        }
    }
}

impl CacheConfig {
    /// Fill in defaults that depend on the backend kind.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.address.as_deref().map_or(true, str::is_empty) {
            self.address = self.backend.default_address().map(String::from);
        }
        if self.write_timeout_ms == 0 {
            self.write_timeout_ms = default_write_timeout_ms();
        }
        if self.channel_reset_secs == 0 {
            self.channel_reset_secs = default_channel_reset_secs();
        }
        if self.request_queue_capacity == 0 {
            self.request_queue_capacity = default_request_queue_capacity();
        }
        self
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub fn channel_reset_period(&self) -> Duration {
        Duration::from_secs(self.channel_reset_secs)
    }

    #[must_use]
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration_secs.map(Duration::from_secs)
    }
}

// Manual Debug so passwords never end up in logs.
impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("backend", &self.backend)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("channel_reset_secs", &self.channel_reset_secs)
            .field("request_queue_capacity", &self.request_queue_capacity)
            .field("expiration_secs", &self.expiration_secs)
            .field("debug", &self.debug)
            .finish()
    }
}
