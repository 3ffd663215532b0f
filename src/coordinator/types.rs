//! Public types for the cache coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::notification::codec::CodecError;
use crate::transport::TransportError;

/// Lifecycle of the synchronization loops.
///
/// Use [`super::Cache::state()`] to check current state or
/// [`super::Cache::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No loops running (local-only cache, or not started yet)
    Idle,
    /// Discovery, epoch and dispatch loops are running
    Running,
    /// Cancelled; every loop and channel task has exited
    Stopped,
}

impl SyncState {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Failures of cross-instance propagation.
///
/// None of these reach the caller of [`super::Cache::write`]: the local
/// write has already happened, so they are logged and counted.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("publish failed: {0}")]
    Publish(#[source] TransportError),
    #[error("publish on '{channel}' timed out after {timeout:?}")]
    PublishTimeout { channel: String, timeout: Duration },
    #[error("failed to encode notification: {0}")]
    Encode(#[source] CodecError),
    #[error("undecodable payload on '{channel}': {source}")]
    Deserialization {
        channel: String,
        #[source]
        source: CodecError,
    },
    #[error("subscription '{subscription}': response is missing a target")]
    MissingTarget { subscription: String },
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Short status label for metrics
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::PublishTimeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            _ => "error",
        }
    }
}

/// Point-in-time view of the synchronization layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Backend name (`none` for a local-only cache)
    pub backend: &'static str,
    pub state: SyncState,
    /// Subscription names announced in the current epoch
    pub announced_channels: usize,
    /// Channels with a running consumption task
    pub started_channels: usize,
}
