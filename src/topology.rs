//! Channel topology bookkeeping.
//!
//! Two sets with two different disciplines:
//!
//! - [`TopologySet`]: subscription names this instance has announced on the
//!   control channel in the current epoch. Shared between writers and the
//!   epoch loop, so it sits behind a read/write lock. Membership checks take
//!   the read lock; only a first sighting or an epoch reset takes the write
//!   lock.
//! - [`StartedChannels`]: channels that already have a consumption task.
//!   Owned by the dispatch loop alone, so it is a plain set.

use std::collections::HashSet;

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct TopologySet {
    announced: RwLock<HashSet<String>>,
}

impl TopologySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `subscription` as announced.
    ///
    /// Returns `true` if the caller must publish the announcement, i.e. this
    /// call is the first to see the name in the current epoch. Concurrent
    /// callers racing on the same new name get exactly one `true`.
    pub fn mark_announced(&self, subscription: &str) -> bool {
        if self.announced.read().contains(subscription) {
            return false;
        }
        self.announced.write().insert(subscription.to_string())
    }

    #[must_use]
    pub fn contains(&self, subscription: &str) -> bool {
        self.announced.read().contains(subscription)
    }

    /// Start a new epoch: every name has to be announced again.
    pub fn reset(&self) {
        self.announced.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.announced.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.announced.read().is_empty()
    }
}

/// Channels with a running consumption task. Never shrinks.
#[derive(Debug, Default)]
pub struct StartedChannels {
    started: HashSet<String>,
}

impl StartedChannels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `channel` was not started before.
    pub fn mark_started(&mut self, channel: &str) -> bool {
        if self.started.contains(channel) {
            return false;
        }
        self.started.insert(channel.to_string())
    }

    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.started.contains(channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.started.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_first_sighting_announces_once() {
        let topology = TopologySet::new();
        assert!(topology.mark_announced("sub1"));
        assert!(!topology.mark_announced("sub1"));
        assert!(topology.mark_announced("sub2"));
        assert_eq!(topology.len(), 2);
    }

    #[test]
    fn test_reset_forces_reannouncement() {
        let topology = TopologySet::new();
        assert!(topology.mark_announced("sub1"));
        topology.reset();
        assert!(topology.is_empty());
        assert!(!topology.contains("sub1"));
        assert!(topology.mark_announced("sub1"));
    }

    #[test]
    fn test_concurrent_first_sighting_yields_single_announcement() {
        let topology = Arc::new(TopologySet::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let topology = topology.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if topology.mark_announced("sub1") {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_started_channels_dedup() {
        let mut started = StartedChannels::new();
        assert!(started.mark_started("sub1"));
        assert!(!started.mark_started("sub1"));
        assert!(started.contains("sub1"));
        assert_eq!(started.len(), 1);
    }
}
