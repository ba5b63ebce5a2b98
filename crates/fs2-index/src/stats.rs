//! Cached, coalesced statistics generation for `/stats`: regenerated at
//! most once per configured interval, with a second request coalescing
//! onto the already-running generator instead of triggering its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2_core::filelist::FileListItem;
use serde::Serialize;

use crate::fsindex::FilesystemIndex;
use crate::peer_registry::PeerRegistry;

#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub peer_count: usize,
    pub file_count: usize,
    pub unique_file_count: usize,
    pub total_size: u64,
    pub unique_size: u64,
    pub estimated_transfer: u64,
}

struct Inner {
    cached: Option<Arc<StatsSnapshot>>,
    generated_at: Option<Instant>,
}

/// A request for fresh stats blocks behind a `tokio::Mutex`: the first
/// caller past the freshness window regenerates while holding the lock,
/// every concurrent caller queues behind it and receives the result that
/// generation produced, rather than triggering a second regeneration.
pub struct StatsCache {
    fsindex: Arc<FilesystemIndex>,
    peers: Arc<PeerRegistry>,
    interval: Duration,
    inner: tokio::sync::Mutex<Inner>,
}

impl StatsCache {
    pub fn new(fsindex: Arc<FilesystemIndex>, peers: Arc<PeerRegistry>, interval: Duration) -> Self {
        Self {
            fsindex,
            peers,
            interval,
            inner: tokio::sync::Mutex::new(Inner {
                cached: None,
                generated_at: None,
            }),
        }
    }

    pub async fn get(&self) -> Arc<StatsSnapshot> {
        let mut inner = self.inner.lock().await;
        let fresh = inner
            .generated_at
            .map(|t| t.elapsed() < self.interval)
            .unwrap_or(false);
        if fresh {
            if let Some(cached) = &inner.cached {
                return cached.clone();
            }
        }

        let snapshot = Arc::new(StatsSnapshot {
            peer_count: self.peers.len(),
            file_count: self.fsindex.count_files(),
            unique_file_count: self.fsindex.count_unique_files(),
            total_size: self.fsindex.total_size(),
            unique_size: self.fsindex.unique_size(),
            estimated_transfer: self.fsindex.estimated_transfer(),
        });
        inner.cached = Some(snapshot.clone());
        inner.generated_at = Some(Instant::now());
        snapshot
    }
}

/// Render a file list as the `/filelists` endpoint's binary or XML body,
/// dispatching on the share's declared kind.
pub fn render_filelist(tree: &FileListItem, xml: bool) -> Result<Vec<u8>, fs2_core::Fs2Error> {
    if xml {
        Ok(fs2_core::filelist::encode_xml(tree)?.into_bytes())
    } else {
        Ok(fs2_core::filelist::encode_binary(tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stats_reflect_index_state() {
        let fsindex = Arc::new(FilesystemIndex::new());
        let peers = Arc::new(PeerRegistry::new(fsindex.clone()));
        peers.register_or_refresh(
            fs2_core::types::PeerIdentity::new(
                std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)),
                49152,
            ),
            1,
            false,
            Some("bob"),
        );

        let cache = StatsCache::new(fsindex, peers, Duration::from_millis(50));
        let s1 = cache.get().await;
        assert_eq!(s1.peer_count, 1);
    }

    #[tokio::test]
    async fn stats_are_cached_within_interval() {
        let fsindex = Arc::new(FilesystemIndex::new());
        let peers = Arc::new(PeerRegistry::new(fsindex.clone()));
        let cache = StatsCache::new(fsindex.clone(), peers.clone(), Duration::from_secs(60));

        let first = cache.get().await;
        peers.register_or_refresh(
            fs2_core::types::PeerIdentity::new(
                std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)),
                49152,
            ),
            1,
            false,
            Some("bob"),
        );
        let second = cache.get().await;
        assert_eq!(first.peer_count, second.peer_count);
    }
}
