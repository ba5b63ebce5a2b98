//! Auto-indexnode election: listen for UDP adverts, compute this client's
//! own candidacy, and — if no active indexnode is heard from for a while
//! and this client outranks every other prospective candidate — become
//! one by embedding a full indexnode instance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2_core::protocol::{Advert, ActiveAdvert, ProspectiveAdvert};
use fs2_core::transport::AdvertTransport;
use fs2_core::types::{AdvertUid, Capability};
use fs2_core::{ADVERTISE_EXPIRY_INTERVALS, INDEXNODE_ADVERTISE_INTERVAL_MS, PROTOCOL_VERSION};
use parking_lot::RwLock;

use crate::config::ClientConfig;

struct SeenEntry {
    is_active: bool,
    capability: Capability,
    last_seen: Instant,
}

/// Self-reported suitability: favors clients exporting more shares and
/// offering more upload bandwidth, since those are the ones best placed
/// to also aggregate the swarm's index.
pub fn compute_capability(config: &ClientConfig) -> Capability {
    let share_score = config.shares.len() as u64 * 1000;
    let bandwidth_score = config.upload_bandwidth_bytes_per_sec / 1024;
    Capability(share_score + bandwidth_score)
}

pub struct AutoIndexnode {
    transport: Arc<dyn AdvertTransport>,
    uid: AdvertUid,
    capability: Capability,
    port: u16,
    seen: RwLock<HashMap<AdvertUid, SeenEntry>>,
    elected: AtomicBool,
}

impl AutoIndexnode {
    pub fn new(transport: Arc<dyn AdvertTransport>, capability: Capability, port: u16) -> Self {
        Self {
            transport,
            uid: AdvertUid::generate(),
            capability,
            port,
            seen: RwLock::new(HashMap::new()),
            elected: AtomicBool::new(false),
        }
    }

    pub fn is_elected(&self) -> bool {
        self.elected.load(Ordering::Relaxed)
    }

    fn expiry_window(&self) -> Duration {
        Duration::from_millis(INDEXNODE_ADVERTISE_INTERVAL_MS * ADVERTISE_EXPIRY_INTERVALS as u64)
    }

    fn record(&self, advert: Advert) {
        let now = Instant::now();
        let mut seen = self.seen.write();
        match advert {
            Advert::Active(a) if a.uid != self.uid => {
                seen.insert(
                    a.uid,
                    SeenEntry {
                        is_active: true,
                        capability: Capability(0),
                        last_seen: now,
                    },
                );
            }
            Advert::Prospective(p) if p.uid != self.uid => {
                seen.insert(
                    p.uid,
                    SeenEntry {
                        is_active: false,
                        capability: p.capability,
                        last_seen: now,
                    },
                );
            }
            _ => {}
        }
    }

    fn sweep_expired(&self) {
        let window = self.expiry_window();
        let now = Instant::now();
        self.seen.write().retain(|_, e| now.duration_since(e.last_seen) < window);
    }

    /// True if, among everything heard recently, no one is an active
    /// indexnode and this client's capability beats every other
    /// prospective candidate.
    fn should_elect(&self) -> bool {
        let seen = self.seen.read();
        if seen.values().any(|e| e.is_active) {
            return false;
        }
        seen.values().all(|e| e.capability <= self.capability)
    }

    fn broadcast_payload(&self) -> String {
        if self.is_elected() {
            ActiveAdvert {
                proto_version: PROTOCOL_VERSION.to_string(),
                port: self.port,
                uid: self.uid,
            }
            .encode()
        } else {
            ProspectiveAdvert {
                proto_version: PROTOCOL_VERSION.to_string(),
                capability: self.capability,
                uid: self.uid,
            }
            .encode()
        }
    }

    /// Runs the listen/broadcast/elect loop until cancelled. `on_elected`
    /// fires exactly once, the moment this client wins the election; it
    /// is expected to embed and start a full indexnode instance.
    pub async fn run(self: Arc<Self>, on_elected: impl Fn() + Send + Sync + 'static) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match this.transport.recv().await {
                    Ok((bytes, _from)) => {
                        if let Ok(text) = std::str::from_utf8(&bytes) {
                            if let Some(advert) = Advert::parse(text) {
                                this.record(advert);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "auto-indexnode advert receive failed");
                    }
                }
            }
        });

        let mut ticker = tokio::time::interval(Duration::from_millis(INDEXNODE_ADVERTISE_INTERVAL_MS));
        loop {
            ticker.tick().await;
            self.sweep_expired();

            if !self.is_elected() && self.should_elect() {
                self.elected.store(true, Ordering::Relaxed);
                tracing::info!(uid = %self.uid, "elected self as auto-indexnode");
                on_elected();
            }

            let payload = self.broadcast_payload();
            if let Err(e) = self.transport.send(payload.as_bytes()).await {
                tracing::warn!(error = %e, "failed to send auto-indexnode advert");
            }
        }
    }
}

/// Builds and starts an embedded indexnode bound to `listen_addr`,
/// returning once it is serving. Used as the `on_elected` hook's real
/// implementation by the client binary.
pub async fn embed_indexnode(listen_addr: SocketAddr) -> std::io::Result<()> {
    let config = fs2_index::config::IndexConfig {
        listen_addr,
        ..Default::default()
    };
    let state = fs2_index::build_state(config.clone());
    tokio::spawn(fs2_index::run_liveness_loop(state.clone()));

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let router = fs2_index::http::build_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    Ok(())
}
