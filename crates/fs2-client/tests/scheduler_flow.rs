//! End-to-end test of the download scheduler: a file is served by one
//! client's own HTTP surface and fetched by another client's
//! `DownloadController` via chunked Range requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fs2_client::config::ClientConfig;
use fs2_client::download::{DownloadController, DownloadQueue, PeerStats};
use fs2_client::http_server::{build_router, AppState};
use fs2_client::share_engine::ShareEngine;
use fs2_client::token_bucket::TokenBucket;
use fs2_core::hash::Digest;
use fs2_core::types::DispatchId;
use parking_lot::{Mutex, RwLock};

async fn spawn_seeder(contents: &[u8]) -> (SocketAddr, Digest, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let share_root = dir.path().join("share");
    std::fs::create_dir_all(&share_root).unwrap();
    std::fs::write(share_root.join("song.ogg"), contents).unwrap();

    let engine = Arc::new(ShareEngine::new(
        Arc::new(TokenBucket::unlimited()),
        dir.path().join("state"),
    ));
    let share = engine.add_share("music", share_root);
    engine.refresh(share.clone()).await.unwrap();
    let hash = share.tree().unwrap().children.as_ref().unwrap()[0].hash.unwrap();

    let state = Arc::new(AppState::new(
        "seeder".into(),
        engine,
        3,
        Arc::new(TokenBucket::unlimited()),
    ));
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, hash, dir)
}

#[tokio::test]
async fn fetches_queued_file_from_a_seeding_peer() {
    let body = vec![9u8; 200_000];
    let (peer_addr, hash, _seeder_dir) = spawn_seeder(&body).await;

    let download_dir = tempfile::tempdir().unwrap();
    let save_as = download_dir.path().join("song.ogg");

    let queue = Arc::new(DownloadQueue::new(download_dir.path().join("queue.json")));
    let dispatch = queue.next_dispatch_id();
    queue.enqueue(&[], save_as.clone(), hash, body.len() as u64, dispatch);

    let mut sources_map = HashMap::new();
    sources_map.insert(hash, vec![peer_addr]);
    let sources = Arc::new(RwLock::new(sources_map));

    let mut config = ClientConfig::default();
    config.chunk_size_bytes = 64 * 1024;
    config.max_chunks_per_file = 4;
    config.max_download_workers = 2;

    let peer_stats = Arc::new(Mutex::new(PeerStats::new(Default::default())));
    let controller = Arc::new(DownloadController::new(
        queue.clone(),
        peer_stats,
        sources,
        Arc::new(TokenBucket::unlimited()),
        Arc::new(config),
    ));
    controller.spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let done = queue
            .pending_files()
            .is_empty();
        if done {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("download did not complete in time");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let fetched = tokio::fs::read(&save_as).await.unwrap();
    assert_eq!(fetched, body);
}

#[tokio::test]
async fn file_with_no_known_sources_is_marked_no_sources() {
    let download_dir = tempfile::tempdir().unwrap();
    let save_as = download_dir.path().join("ghost.bin");

    let queue = Arc::new(DownloadQueue::new(download_dir.path().join("queue.json")));
    let dispatch = queue.next_dispatch_id();
    queue.enqueue(&[], save_as, Digest([1u8; 32]), 10, dispatch);

    let sources = Arc::new(RwLock::new(HashMap::new()));
    let peer_stats = Arc::new(Mutex::new(PeerStats::new(Default::default())));
    let controller = Arc::new(DownloadController::new(
        queue.clone(),
        peer_stats,
        sources,
        Arc::new(TokenBucket::unlimited()),
        Arc::new(ClientConfig::default()),
    ));
    controller.spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = queue.pending_files();
        if snapshot.is_empty() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("scheduler never drained the no-sources file");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

