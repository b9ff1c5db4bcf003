//! Capability seam to the peer-networking engine.
//!
//! The engine owns everything protocol-level: transports, wire encryption,
//! discovery, peer links. The node core only starts it, samples its peer
//! count, and stops it, so the interface is the narrow seam the controller
//! and supervisor are tested against.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::config::SessionConfig;

/// Shared live view of the engine's connected-peer count.
///
/// The engine writes it from its event loop; any number of readers may
/// sample it concurrently without synchronizing with engine operation.
#[derive(Clone, Debug, Default)]
pub struct PeerCount(Arc<AtomicUsize>);

impl PeerCount {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connected-peer count.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Record one more connected peer.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one peer gone.
    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }
}

/// A started engine instance.
#[async_trait]
pub trait EngineHandle: Send + Sync + 'static {
    /// Full reachable URL of the local node.
    fn local_url(&self) -> &str;

    /// Live connected-peer counter.
    fn peers(&self) -> &PeerCount;

    /// Close all peer links and release the listener.
    ///
    /// Blocks until teardown completes or the engine's internal timeout
    /// elapses. Consuming `self` makes a second stop unrepresentable.
    async fn stop(self);
}

/// The peer-networking engine behind the node core.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Handle type for a started instance.
    type Handle: EngineHandle;

    /// Begin listening and participating in the peer network.
    ///
    /// Errors here (address in use, malformed restriction filter, ...) are
    /// fatal to the process; the caller never retries.
    async fn start(&self, config: SessionConfig) -> Result<Self::Handle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_count_tracks_changes() {
        let count = PeerCount::new();
        assert_eq!(count.get(), 0);

        count.increment();
        count.increment();
        assert_eq!(count.get(), 2);

        count.decrement();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn peer_count_never_underflows() {
        let count = PeerCount::new();
        count.decrement();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn peer_count_clones_share_state() {
        let count = PeerCount::new();
        let probe = count.clone();

        count.increment();
        assert_eq!(probe.get(), 1);
    }
}
