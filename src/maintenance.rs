//! Background maintenance task (spec §4.1).
//!
//! Every `MAINTAIN_INTERVAL`, expire stale peers, ping those past the
//! half-timeout mark, and send each remaining peer a DISCOVERY
//! advertisement biased toward it (`table.c`'s `maintain_dht_job`).

use crate::routing::Routing;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn the periodic maintenance sweep as a background tokio task. The
/// returned handle can be aborted to stop it (e.g. from [`crate::shutdown`]).
pub fn spawn(routing: Arc<Routing>, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            run_once(&routing).await;
        }
    })
}

/// Run a single maintenance sweep synchronously. Exposed separately from
/// [`spawn`] so tests can drive it deterministically.
pub async fn run_once(routing: &Routing) {
    let peers = routing.maintenance_tick().await;
    debug!(peer_count = peers.len(), "maintenance sweep: expiry/ping pass complete");

    let mut advertised = 0usize;
    for peer in &peers {
        if routing.advertise_to(peer).await.is_ok() {
            advertised += 1;
        }
    }
    info!(advertised, "maintenance sweep: discovery pass complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Core, DStore, Identity, LocalSink, PingPong, ResultAction, Stats};
    use crate::config::Config;
    use crate::error::CoreError;
    use crate::id::{Key, PeerId};
    use crate::wire::Message;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct NoopCore;
    #[async_trait]
    impl Core for NoopCore {
        async fn unicast(&self, _peer: &PeerId, _message: &Message) -> Result<(), CoreError> {
            Ok(())
        }
        async fn is_connected(&self, _peer: &PeerId) -> bool {
            true
        }
    }

    struct EmptyDStore;
    #[async_trait]
    impl DStore for EmptyDStore {
        async fn put(&self, _key: &Key, _content_type: u32, _expiration_unix_secs: u64, _payload: &[u8]) {}
        async fn get(
            &self,
            _key: &Key,
            _content_type: u32,
            _on_hit: &mut (dyn FnMut(&[u8]) -> ResultAction + Send),
        ) -> usize {
            0
        }
    }

    struct NoopPingPong {
        pings: AtomicU64,
    }
    #[async_trait]
    impl PingPong for NoopPingPong {
        async fn ping(&self, _peer: &PeerId) {
            self.pings.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct AlwaysKnown;
    #[async_trait]
    impl Identity for AlwaysKnown {
        async fn has_hello(&self, _peer: &PeerId) -> bool {
            true
        }
    }

    struct NoopStats;
    impl Stats for NoopStats {
        fn increment(&self, _name: &'static str, _delta: u64) {}
    }

    struct NoopLocalSink;
    #[async_trait]
    impl LocalSink for NoopLocalSink {
        async fn deliver(&self, _sink: u64, _key: &Key, _content_type: u32, _payload: &[u8]) {}
    }

    fn test_routing() -> (Routing, Arc<NoopPingPong>) {
        let pingpong = Arc::new(NoopPingPong { pings: AtomicU64::new(0) });
        let routing = Routing::new(
            PeerId::random(),
            Config::default(),
            Arc::new(NoopCore),
            Arc::new(EmptyDStore),
            pingpong.clone(),
            Arc::new(AlwaysKnown),
            Arc::new(NoopStats),
            Arc::new(NoopLocalSink),
        );
        (routing, pingpong)
    }

    #[tokio::test]
    async fn run_once_completes_with_no_peers() {
        let (routing, _pingpong) = test_routing();
        run_once(&routing).await;
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_runs_at_least_once_after_interval_elapses() {
        let (routing, _pingpong) = test_routing();
        let handle = spawn(Arc::new(routing), Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(25)).await;
        tokio::task::yield_now().await;
        handle.abort();
    }
}
