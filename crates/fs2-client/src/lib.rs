//! The FS2 client: exports local directories as shares, registers with
//! indexnodes, serves range requests to peers, downloads queued files,
//! and may elect itself an indexnode when none is present on the network.
//!
//! See `share_engine` for the directory-tree refresh algorithm,
//! `http_server` for the client's own HTTP surface, `communicator` for
//! indexnode registration, `download` for the scheduler, and
//! `auto_indexnode` for election.

pub mod auto_indexnode;
pub mod communicator;
pub mod config;
pub mod download;
pub mod error;
pub mod http_server;
pub mod share_engine;
pub mod token_bucket;

use std::net::SocketAddr;
use std::sync::Arc;

use config::ClientConfig;
use download::{DownloadController, PeerStats, SourceMap};
use share_engine::ShareEngine;
use token_bucket::TokenBucket;

/// Everything the client binary needs, wired from one [`ClientConfig`].
pub struct Client {
    pub config: Arc<ClientConfig>,
    pub shares: Arc<ShareEngine>,
    pub communicator: Arc<communicator::Communicator>,
    pub http_state: Arc<http_server::AppState>,
    pub queue: Arc<download::DownloadQueue>,
    pub controller: Arc<DownloadController>,
}

pub fn build_client(config: ClientConfig, state_dir: std::path::PathBuf, alias: String, cltoken: u64) -> Client {
    let config = Arc::new(config);

    let hash_bucket = Arc::new(TokenBucket::new(config.hash_bandwidth_bytes_per_sec));
    let download_bucket = Arc::new(TokenBucket::new(config.download_bandwidth_bytes_per_sec));
    let upload_bucket = Arc::new(TokenBucket::new(config.upload_bandwidth_bytes_per_sec));

    let shares = Arc::new(ShareEngine::new(hash_bucket, state_dir.join("filelists")));
    for def in &config.shares {
        shares.add_share(&def.name, def.root.clone());
    }

    let communicator = Arc::new(communicator::Communicator::new(
        alias.clone(),
        config.listen_addr.port(),
        cltoken,
    ));

    let http_state = Arc::new(http_server::AppState::new(
        alias,
        shares.clone(),
        config.max_upload_slots_per_peer,
        upload_bucket,
    ));

    let queue = Arc::new(download::DownloadQueue::new(state_dir.join("queue.json")));
    let peer_stats = Arc::new(parking_lot::Mutex::new(PeerStats::new(Default::default())));
    let sources: SourceMap = Arc::new(parking_lot::RwLock::new(std::collections::HashMap::new()));
    let controller = Arc::new(DownloadController::new(
        queue.clone(),
        peer_stats,
        sources,
        download_bucket,
        config.clone(),
    ));

    Client {
        config,
        shares,
        communicator,
        http_state,
        queue,
        controller,
    }
}

impl Client {
    /// Starts every background task: periodic share refreshes, indexnode
    /// re-hello, and the download worker pool. Does not block; the HTTP
    /// server is started separately by the binary entry point since it
    /// owns the listener socket.
    pub fn spawn_background_tasks(&self) {
        let shares = self.shares.clone();
        let interval = std::time::Duration::from_millis(self.config.refresh_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for share in shares.all() {
                    let shares = shares.clone();
                    tokio::spawn(async move {
                        if let Err(e) = shares.refresh(share).await {
                            tracing::warn!(error = %e, "share refresh failed");
                        }
                    });
                }
            }
        });

        let communicator = self.communicator.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            communicator.run(config).await;
        });

        self.controller.clone().spawn();
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.config.listen_addr
    }
}
