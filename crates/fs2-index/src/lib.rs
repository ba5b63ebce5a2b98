//! The FS2 indexnode: aggregates registered clients' shares into one
//! searchable virtual filesystem and brokers downloads between peers.
//!
//! See `fsindex` for the aggregated tree, `peer_registry` for peer
//! liveness and alias bookkeeping, `share_importer` for the
//! diff/refresh pipeline, `http` for the externally observable
//! endpoints, `advertiser` for the UDP presence broadcast, and `stats`
//! for the cached `/stats` payload.

pub mod advertiser;
pub mod config;
pub mod error;
pub mod fsindex;
pub mod http;
pub mod peer_registry;
pub mod share_importer;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use fsindex::FilesystemIndex;
use peer_registry::PeerRegistry;
use share_importer::ShareImporter;
use stats::StatsCache;

/// Wires together the indexnode's core components with a fresh,
/// in-memory state — used by the binary entry point and by integration
/// tests that want a realistic, fully assembled `AppState`.
pub fn build_state(config: config::IndexConfig) -> Arc<http::AppState> {
    let fsindex = Arc::new(FilesystemIndex::new());
    let peers = Arc::new(PeerRegistry::new(fsindex.clone()));
    let shares = Arc::new(ShareImporter::new(fsindex.clone(), config.refresh_workers));
    let stats = Arc::new(StatsCache::new(
        fsindex.clone(),
        peers.clone(),
        Duration::from_millis(config.stats_interval_ms),
    ));
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("static reqwest client configuration is always valid");

    Arc::new(http::AppState {
        fsindex,
        peers,
        shares,
        stats,
        http_client,
        config,
    })
}

/// Spawns the shared liveness-ping loop: a single timer iterates a
/// snapshot of peer ids each tick rather than one timer per peer,
/// bounding background task count.
pub async fn run_liveness_loop(state: Arc<http::AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(state.config.liveness_interval_ms));
    loop {
        ticker.tick().await;
        for identity in state.peers.snapshot_identities() {
            let Some(peer) = state.peers.get(&identity) else {
                continue;
            };
            if !peer.try_begin_ping() {
                tracing::warn!(%identity, "skipping liveness tick: ping already outstanding");
                continue;
            }
            let state = state.clone();
            tokio::spawn(async move {
                let url = format!("http://{}:{}/ping", identity.ip, identity.port);
                let ok = state
                    .http_client
                    .get(&url)
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);
                state.peers.record_ping_result(&identity, ok);
                if let Some(peer) = state.peers.get(&identity) {
                    peer.end_ping();
                }
            });
        }
    }
}
