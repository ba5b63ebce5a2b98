//! Download scheduler: a synchronous traversal producer feeding a bounded
//! `crossbeam_channel`, bridged into an async worker pool that fetches
//! files chunk-by-chunk via HTTP Range requests. A blocking thread walks
//! the queue tree and feeds the crossbeam channel; a bridging task
//! forwards each job into a tokio mpsc channel that the async worker
//! pool actually awaits on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fs2_core::hash::Digest;
use fs2_core::types::DispatchId;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::peer_stats::PeerStats;
use super::queue::{DownloadQueue, FileStatus, QueuedFile};
use crate::config::ClientConfig;
use crate::token_bucket::TokenBucket;

/// Maps a content hash to the peers known to hold it. Populated by
/// whatever discovers sources (an indexnode's `/alternatives` lookup, for
/// this implementation); the controller only consumes it.
pub type SourceMap = Arc<RwLock<HashMap<Digest, Vec<SocketAddr>>>>;

pub struct DownloadController {
    queue: Arc<DownloadQueue>,
    peer_stats: Arc<Mutex<PeerStats>>,
    sources: SourceMap,
    client: reqwest::Client,
    download_bucket: Arc<TokenBucket>,
    config: Arc<ClientConfig>,
    /// Dispatch ids that have already had every file in their batch fail
    /// or report no sources — once a whole batch goes dry we stop
    /// re-trying it every sweep.
    dry_dispatches: Arc<RwLock<std::collections::HashSet<DispatchId>>>,
}

impl DownloadController {
    pub fn new(
        queue: Arc<DownloadQueue>,
        peer_stats: Arc<Mutex<PeerStats>>,
        sources: SourceMap,
        download_bucket: Arc<TokenBucket>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            queue,
            peer_stats,
            sources,
            client: reqwest::Client::new(),
            download_bucket,
            config,
            dry_dispatches: Arc::new(RwLock::new(std::collections::HashSet::new())),
        }
    }

    /// Spawns the synchronous traversal thread and the async worker pool,
    /// returning immediately; the pool runs until the process exits.
    pub fn spawn(self: Arc<Self>) {
        let (tx, rx) = crossbeam_channel::bounded::<QueuedFile>(64);
        let queue = self.queue.clone();
        let dry = self.dry_dispatches.clone();

        std::thread::spawn(move || loop {
            for file in queue.pending_files() {
                if dry.read().contains(&file.dispatch_id) {
                    continue;
                }
                if matches!(file.status, FileStatus::Active) {
                    continue;
                }
                queue.set_status(&file.save_as, FileStatus::Active);
                if tx.send(file).is_err() {
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(500));
        });

        let (async_tx, async_rx) = tokio::sync::mpsc::channel::<QueuedFile>(64);
        let handle = tokio::runtime::Handle::current();
        std::thread::spawn(move || {
            while let Ok(file) = rx.recv() {
                if handle.block_on(async_tx.send(file)).is_err() {
                    return;
                }
            }
        });

        let workers = self.config.max_download_workers.max(1);
        let async_rx = Arc::new(tokio::sync::Mutex::new(async_rx));
        for _ in 0..workers {
            let this = self.clone();
            let async_rx = async_rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { async_rx.lock().await.recv().await };
                    match job {
                        Some(file) => this.handle_file(file).await,
                        None => break,
                    }
                }
            });
        }
    }

    async fn handle_file(&self, file: QueuedFile) {
        let candidates: Vec<SocketAddr> = self
            .sources
            .read()
            .get(&file.hash)
            .cloned()
            .unwrap_or_default();

        let peer = { self.peer_stats.lock().pick_best(&candidates) };
        let Some(peer) = peer else {
            self.queue.set_status(&file.save_as, FileStatus::NoSources);
            self.maybe_mark_dispatch_dry(file.dispatch_id);
            return;
        };

        self.peer_stats.lock().begin_download(peer);
        let result = self.fetch(&file, peer).await;
        self.peer_stats.lock().end_download(peer);

        match result {
            Ok(()) => self.queue.set_status(&file.save_as, FileStatus::Done),
            Err(_) => {
                self.queue.set_status(&file.save_as, FileStatus::Failed);
                self.maybe_mark_dispatch_dry(file.dispatch_id);
            }
        }
    }

    fn maybe_mark_dispatch_dry(&self, dispatch_id: DispatchId) {
        let remaining = self
            .queue
            .pending_files()
            .into_iter()
            .any(|f| f.dispatch_id == dispatch_id && !matches!(f.status, FileStatus::NoSources | FileStatus::Failed));
        if !remaining {
            self.dry_dispatches.write().insert(dispatch_id);
        }
    }

    async fn fetch(&self, file: &QueuedFile, peer: SocketAddr) -> Result<(), crate::error::ClientError> {
        if let Some(parent) = file.save_as.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let working = working_path(&file.save_as);
        let mut out = tokio::fs::File::create(&working).await?;
        out.set_len(file.size).await?;

        let chunk_size = self.config.chunk_size_bytes.max(1);
        let chunk_count = file.size.div_ceil(chunk_size).max(1);
        let max_concurrent = self.config.max_chunks_per_file.max(1);

        let results: Vec<Result<(u64, bytes::Bytes), crate::error::ClientError>> = stream::iter(0..chunk_count)
            .map(|i| {
                let start = i * chunk_size;
                let end = ((i + 1) * chunk_size).min(file.size).saturating_sub(1);
                self.fetch_chunk(peer, file.hash, start, end)
            })
            .buffer_unordered(max_concurrent)
            .collect()
            .await;
        let mut fetched: u64 = 0;
        for result in results {
            let (offset, bytes) = result?;
            out.seek(std::io::SeekFrom::Start(offset)).await?;
            out.write_all(&bytes).await?;
            fetched += bytes.len() as u64;
            self.queue.record_progress(&file.save_as, fetched);
        }
        out.flush().await?;
        drop(out);

        tokio::fs::rename(&working, &file.save_as).await?;
        Ok(())
    }

    async fn fetch_chunk(
        &self,
        peer: SocketAddr,
        hash: Digest,
        start: u64,
        end_inclusive: u64,
    ) -> Result<(u64, bytes::Bytes), crate::error::ClientError> {
        let url = format!("http://{peer}/download/{}", hash.to_hex());
        let response = self
            .client
            .get(&url)
            .header("Range", format!("bytes={start}-{end_inclusive}"))
            .send()
            .await
            .map_err(|e| crate::error::ClientError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(crate::error::ClientError::Transient(format!(
                "status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| crate::error::ClientError::Transient(e.to_string()))?;
        self.download_bucket.acquire(bytes.len() as u64).await;
        Ok((start, bytes))
    }
}

fn working_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".incomplete");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_path_appends_incomplete_suffix() {
        let p = Path::new("/downloads/music/song.ogg");
        assert_eq!(working_path(p), Path::new("/downloads/music/song.ogg.incomplete"));
    }
}
