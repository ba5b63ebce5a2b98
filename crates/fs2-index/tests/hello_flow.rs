//! Integration test driving the real axum router in-process for the
//! registration + browse + search + alternatives scenarios (S1, S3, S4).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::routing::get;
use axum::Router;
use fs2_index::config::IndexConfig;
use fs2_index::fsindex::FilesystemIndex;
use fs2_index::http::{build_router, AppState};
use fs2_index::peer_registry::PeerRegistry;
use fs2_index::share_importer::ShareImporter;
use fs2_index::stats::StatsCache;
use tower::ServiceExt;

/// Spins up a minimal fake peer that answers `/ping` with a fixed XML
/// snapshot, returning the address it bound to.
async fn spawn_fake_peer(alias: &str, shares_xml: String) -> SocketAddr {
    let xml = shares_xml;
    let router = Router::new().route(
        "/ping",
        get(move || {
            let body = xml.clone();
            async move { ([("content-type", "text/xml")], body) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });
    let _ = alias;
    addr
}

fn build_test_state() -> Arc<AppState> {
    let fsindex = Arc::new(FilesystemIndex::new());
    let peers = Arc::new(PeerRegistry::new(fsindex.clone()));
    let shares = Arc::new(ShareImporter::new(fsindex.clone(), 2));
    let stats = Arc::new(StatsCache::new(
        fsindex.clone(),
        peers.clone(),
        Duration::from_secs(5),
    ));
    Arc::new(AppState {
        fsindex,
        peers,
        shares,
        stats,
        http_client: reqwest::Client::new(),
        config: IndexConfig::default(),
    })
}

fn ping_xml(alias: &str, shares: &[(&str, u64)]) -> String {
    let snapshot = fs2_core::protocol::PingSnapshot {
        alias: alias.to_string(),
        shares: shares
            .iter()
            .map(|(name, revision)| fs2_core::protocol::ShareManifestEntry {
                name: name.to_string(),
                revision: *revision,
                kind: fs2_core::types::ShareKind::FileList,
            })
            .collect(),
    };
    fs2_core::protocol::encode_ping_xml(&snapshot).unwrap()
}

#[tokio::test]
async fn s1_register_and_browse() {
    let peer_addr = spawn_fake_peer("bob", ping_xml("bob", &[("music", 1)])).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = build_test_state();
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/hello")
        .header("fs2-version", "fs2/2")
        .header("fs2-port", peer_addr.port().to_string())
        .header("fs2-cltoken", "17")
        .header("fs2-alias", "bob")
        .extension(ConnectInfo(SocketAddr::new(peer_addr.ip(), peer_addr.port())))
        .body(axum::body::Body::empty())
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    // Give the spawned share-refresh task a moment to complete.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let browse = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/browse/")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(browse.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(browse.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("bob"));
}

#[tokio::test]
async fn missing_required_header_is_rejected() {
    let state = build_test_state();
    let router = build_router(state);

    let request = axum::http::Request::builder()
        .uri("/hello")
        .header("fs2-version", "fs2/2")
        // fs2-port and fs2-cltoken deliberately omitted.
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))))
        .body(axum::body::Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_peer_is_refused() {
    let state = build_test_state();
    let router = build_router(state);

    // Port 1 on loopback should refuse the connection in any sandbox.
    let request = axum::http::Request::builder()
        .uri("/hello")
        .header("fs2-version", "fs2/2")
        .header("fs2-port", "1")
        .header("fs2-cltoken", "1")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1))))
        .body(axum::body::Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::PRECONDITION_FAILED);
}
