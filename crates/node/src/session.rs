//! Peer session lifecycle controller.

use std::cell::Cell;

use eyre::{Result, WrapErr};
use tracing::debug;

use crate::config::SessionConfig;
use crate::engine::{EngineHandle, PeerCount, PeerEngine};

/// A running peer session.
///
/// Only a successful [`start`](Self::start) constructs one, and
/// [`stop`](Self::stop) consumes it, so stop cannot run before start or
/// more than once per start.
pub struct PeerSession<H: EngineHandle> {
    handle: H,
    last_peer_count: Cell<usize>,
}

impl<H: EngineHandle> PeerSession<H> {
    /// Start the engine with the assembled configuration.
    pub async fn start<E>(engine: &E, config: SessionConfig) -> Result<Self>
    where
        E: PeerEngine<Handle = H>,
    {
        let handle = engine
            .start(config)
            .await
            .wrap_err("failed to start peer session")?;
        Ok(Self {
            handle,
            last_peer_count: Cell::new(0),
        })
    }

    /// Reachable URL of the local node.
    pub fn local_url(&self) -> &str {
        self.handle.local_url()
    }

    /// Cloneable live peer counter for background reporting.
    pub fn peers(&self) -> PeerCount {
        self.handle.peers().clone()
    }

    /// Sample the engine's current connected-peer count.
    ///
    /// Side-effect-free towards the engine; safe to call repeatedly.
    pub fn poll_peer_count(&self) -> usize {
        let count = self.handle.peers().get();
        self.last_peer_count.set(count);
        count
    }

    /// Count seen by the most recent poll.
    pub fn last_peer_count(&self) -> usize {
        self.last_peer_count.get()
    }

    /// Stop the engine and release its resources.
    pub async fn stop(self) {
        debug!("stopping peer session");
        self.handle.stop().await;
    }
}
