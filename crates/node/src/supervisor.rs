//! Top-level node lifecycle.
//!
//! Startup is strictly ordered: identity and bootstrap parsing happen in
//! the binary before [`run_until`] is called; here the session starts, the
//! peer-count reporter is spawned, and the main flow parks on the shutdown
//! future. On shutdown the reporter is cancelled and awaited before the
//! session stops, so no report lands after teardown begins.

use std::future::Future;
use std::time::Duration;

use eyre::Result;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::engine::{PeerCount, PeerEngine};
use crate::session::PeerSession;

/// Interval between connected-peer count reports.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Run one full session lifetime: start, report until `shutdown` resolves,
/// then stop.
///
/// A start failure returns the error without the session or the reporter
/// ever existing; after a successful start the session is stopped exactly
/// once, as the last operation.
pub async fn run_until<E, F>(engine: &E, config: SessionConfig, shutdown: F) -> Result<()>
where
    E: PeerEngine,
    F: Future<Output = ()>,
{
    let session = PeerSession::start(engine, config).await?;
    info!(enode = %session.local_url(), "node started");

    let reporter = tokio::spawn(report_peers(session.peers(), REPORT_INTERVAL));

    shutdown.await;
    info!("shutting down");

    reporter.abort();
    let _ = reporter.await;

    session.stop().await;
    Ok(())
}

/// Periodically log the connected-peer count.
async fn report_peers(peers: PeerCount, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        info!(peers = peers.get(), "connected peers");
    }
}

/// Resolves when the operator requests termination: SIGINT, or SIGTERM on
/// Unix.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("received termination signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineHandle, PeerCount};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use strand_identity::NodeIdentity;
    use tokio::sync::oneshot;

    /// Records the order of engine lifecycle calls.
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<&'static str>>>);

    impl Journal {
        fn record(&self, event: &'static str) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct StubEngine {
        journal: Journal,
        peers: PeerCount,
        fail_start: bool,
    }

    impl StubEngine {
        fn new(journal: Journal) -> Self {
            Self {
                journal,
                peers: PeerCount::new(),
                fail_start: false,
            }
        }
    }

    struct StubHandle {
        journal: Journal,
        peers: PeerCount,
        url: String,
    }

    #[async_trait]
    impl EngineHandle for StubHandle {
        fn local_url(&self) -> &str {
            &self.url
        }

        fn peers(&self) -> &PeerCount {
            &self.peers
        }

        async fn stop(self) {
            self.journal.record("stop");
        }
    }

    #[async_trait]
    impl PeerEngine for StubEngine {
        type Handle = StubHandle;

        async fn start(&self, config: SessionConfig) -> Result<StubHandle> {
            if self.fail_start {
                eyre::bail!("address already in use");
            }
            self.journal.record("start");
            Ok(StubHandle {
                journal: self.journal.clone(),
                peers: self.peers.clone(),
                url: format!("enode://stub@{}", config.listen_addr),
            })
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig::assemble(NodeIdentity::generate(), "127.0.0.1:0", vec![], None)
    }

    #[tokio::test]
    async fn full_run_starts_then_stops_exactly_once() {
        let journal = Journal::default();
        let engine = StubEngine::new(journal.clone());

        let (tx, rx) = oneshot::channel::<()>();
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        run_until(&engine, test_config(), async {
            let _ = rx.await;
        })
        .await
        .unwrap();
        trigger.await.unwrap();

        assert_eq!(journal.events(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn start_failure_never_touches_stop() {
        let journal = Journal::default();
        let mut engine = StubEngine::new(journal.clone());
        engine.fail_start = true;

        let result = run_until(&engine, test_config(), std::future::pending()).await;

        assert!(result.is_err());
        assert!(journal.events().is_empty());
    }

    #[tokio::test]
    async fn immediate_shutdown_still_stops_cleanly() {
        let journal = Journal::default();
        let engine = StubEngine::new(journal.clone());

        run_until(&engine, test_config(), async {}).await.unwrap();

        assert_eq!(journal.events(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn session_polls_engine_counter() {
        let engine = StubEngine::new(Journal::default());
        engine.peers.increment();
        engine.peers.increment();

        let session = PeerSession::start(&engine, test_config()).await.unwrap();
        assert_eq!(session.poll_peer_count(), 2);
        assert_eq!(session.last_peer_count(), 2);

        engine.peers.decrement();
        assert_eq!(session.poll_peer_count(), 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn session_reports_engine_url() {
        let engine = StubEngine::new(Journal::default());
        let session = PeerSession::start(&engine, test_config()).await.unwrap();

        assert_eq!(session.local_url(), "enode://stub@127.0.0.1:0");
        session.stop().await;
    }
}
