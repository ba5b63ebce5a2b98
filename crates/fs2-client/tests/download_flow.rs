//! Integration test driving the real axum router in-process for a share
//! build followed by a Range-aware download.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use fs2_client::http_server::{build_router, AppState};
use fs2_client::share_engine::ShareEngine;
use fs2_client::token_bucket::TokenBucket;
use tower::ServiceExt;

fn peer_addr() -> SocketAddr {
    "127.0.0.1:9999".parse().unwrap()
}

async fn build_state_with_file(contents: &[u8]) -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let share_root = dir.path().join("share");
    std::fs::create_dir_all(&share_root).unwrap();
    std::fs::write(share_root.join("song.ogg"), contents).unwrap();

    let engine = Arc::new(ShareEngine::new(
        Arc::new(TokenBucket::unlimited()),
        dir.path().join("state"),
    ));
    let share = engine.add_share("music", share_root);
    engine.refresh(share).await.unwrap();

    let state = Arc::new(AppState::new(
        "bob".into(),
        engine,
        3,
        Arc::new(TokenBucket::unlimited()),
    ));
    (state, dir)
}

// digest_file reads from disk, so tests compute the expected hash by
// writing to a scratch file rather than duplicating the head+tail policy.
mod test_hash {
    pub fn of(contents: &[u8]) -> fs2_core::hash::Digest {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch");
        std::fs::write(&path, contents).unwrap();
        fs2_core::hash::digest_file(&path, contents.len() as u64).unwrap()
    }
}

#[tokio::test]
async fn ping_then_filelist_then_ranged_download() {
    let body = b"hello fs2 world, this is a shared file".to_vec();
    let (state, _dir) = build_state_with_file(&body).await;
    let router = build_router(state);

    let ping = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/ping")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ping.status(), axum::http::StatusCode::OK);
    let ping_body = axum::body::to_bytes(ping.into_body(), usize::MAX).await.unwrap();
    let ping_xml = String::from_utf8(ping_body.to_vec()).unwrap();
    assert!(ping_xml.contains("music"));

    let filelist = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/filelists/music.FileList")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(filelist.status(), axum::http::StatusCode::OK);
    let list_bytes = axum::body::to_bytes(filelist.into_body(), usize::MAX).await.unwrap();
    let tree = fs2_core::filelist::decode_binary(&list_bytes).unwrap();
    let file = &tree.children.as_ref().unwrap()[0];
    let hash = file.hash.unwrap();

    let expected_hash = test_hash::of(&body);
    assert_eq!(hash, expected_hash);

    let download = router
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/download/{}", hash.to_hex()))
                .header("range", "bytes=6-10")
                .extension(ConnectInfo(peer_addr()))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(download.status(), axum::http::StatusCode::PARTIAL_CONTENT);
    let content_range = download
        .headers()
        .get(axum::http::header::CONTENT_RANGE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(content_range, format!("bytes 6-10/{}", body.len()));

    let chunk = axum::body::to_bytes(download.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&chunk[..], &body[6..=10]);
}

#[tokio::test]
async fn download_of_unknown_hash_is_not_found() {
    let (state, _dir) = build_state_with_file(b"irrelevant").await;
    let router = build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/download/{}", "ab".repeat(32)))
                .extension(ConnectInfo(peer_addr()))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}
