//! Indexnode HTTP endpoints. Handlers are thin: they borrow the shared
//! [`AppState`] and delegate to `fsindex` / `peer_registry` /
//! `share_importer`; none of them know how any other endpoint works.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use fs2_core::hash::Digest;
use fs2_core::protocol::{self, HelloRequest, ShareManifestEntry};
use fs2_core::types::{PeerIdentity, ShareKind};
use serde::Deserialize;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::fsindex::FilesystemIndex;
use crate::peer_registry::PeerRegistry;
use crate::share_importer::{FetchError, ShareFetcher, ShareImporter};
use crate::stats::StatsCache;

mod header_names {
    pub use fs2_core::protocol::{
        HEADER_ALIAS, HEADER_AVATARHASH, HEADER_CLTOKEN, HEADER_PORT, HEADER_VERSION,
    };
}

pub struct AppState {
    pub fsindex: Arc<FilesystemIndex>,
    pub peers: Arc<PeerRegistry>,
    pub shares: Arc<ShareImporter>,
    pub stats: Arc<StatsCache>,
    pub http_client: reqwest::Client,
    pub config: IndexConfig,
}

fn peer_base_url(identity: PeerIdentity) -> String {
    format!("http://{}:{}", identity.ip, identity.port)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/browse/", get(browse_root))
        .route("/browse/{*path}", get(browse))
        .route("/search", get(search))
        .route("/download/{hex_hash}", get(download))
        .route("/alternatives/{hex_hash}", get(alternatives))
        .route("/stats", get(stats))
        .route("/avatars/{filename}", get(avatar))
        .route("/robots.txt", get(robots))
        .with_state(state)
}

/// `ReqwestShareFetcher` pulls a share's current file list from its owning
/// peer's `/filelists/{name}{.xml|.FileList}` endpoint, dispatching on the
/// share's declared kind.
pub struct ReqwestShareFetcher {
    client: reqwest::Client,
}

impl ReqwestShareFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ShareFetcher for ReqwestShareFetcher {
    async fn fetch(
        &self,
        owner: PeerIdentity,
        share_name: &str,
        kind: ShareKind,
    ) -> Result<(u64, fs2_core::filelist::FileListItem), FetchError> {
        let extension = match kind {
            ShareKind::Xml => "xml",
            ShareKind::FileList => "FileList",
        };
        let url = format!(
            "{}/filelists/{}.{}",
            peer_base_url(owner),
            share_name,
            extension
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !response.status().is_success() {
            return Err(FetchError::Network(format!("status {}", response.status())));
        }

        let revision: u64 = response
            .headers()
            .get("fs2-revision")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let tree = match kind {
            ShareKind::Xml => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|e| FetchError::Other(e.to_string()))?;
                fs2_core::filelist::decode_xml(&text).map_err(|e| FetchError::Other(e.to_string()))?
            }
            ShareKind::FileList => fs2_core::filelist::decode_binary(&bytes)
                .map_err(|e| FetchError::Other(e.to_string()))?,
        };

        Ok((revision, tree))
    }
}

async fn hello(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, IndexError> {
    let hello = parse_hello_headers(&headers)?;

    let identity = PeerIdentity::new(remote.ip(), hello.port);
    let ping_url = format!("{}/ping", peer_base_url(identity));

    let response = state
        .http_client
        .get(&ping_url)
        .send()
        .await
        .map_err(|_| IndexError::Unreachable)?;
    if !response.status().is_success() {
        return Err(IndexError::Unreachable);
    }
    let body = response.text().await.map_err(|_| IndexError::Unreachable)?;
    let snapshot = protocol::decode_ping_xml(&body).map_err(|_| IndexError::Unreachable)?;

    let registration = state.peers.register_or_refresh(
        identity,
        hello.cltoken,
        false,
        hello.alias.as_deref(),
    );

    let manifest: Vec<ShareManifestEntry> = snapshot.shares;
    let eligible = state.shares.reconcile(identity, &manifest);
    state.shares.clone().schedule_refreshes(
        eligible,
        registration.peer.fs_root,
        Arc::new(ReqwestShareFetcher::new(state.http_client.clone())),
    );

    let mut response_headers = HeaderMap::new();
    if let Some(avatar_hash) = hello.avatar_hash {
        if let Ok(value) = avatar_hash.parse() {
            response_headers.insert(header_names::HEADER_AVATARHASH, value);
        }
    }
    Ok((StatusCode::OK, response_headers, "ok"))
}

fn parse_hello_headers(headers: &HeaderMap) -> Result<HelloRequest, IndexError> {
    headers
        .get(header_names::HEADER_VERSION)
        .ok_or(IndexError::BadHeaders)?;

    let port: u16 = headers
        .get(header_names::HEADER_PORT)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or(IndexError::BadHeaders)?;
    if !(fs2_core::PORT_MIN..=fs2_core::PORT_MAX).contains(&port) {
        return Err(IndexError::BadHeaders);
    }

    let cltoken: u64 = headers
        .get(header_names::HEADER_CLTOKEN)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or(IndexError::BadHeaders)?;

    let alias = headers
        .get(header_names::HEADER_ALIAS)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let avatar_hash = headers
        .get(header_names::HEADER_AVATARHASH)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    Ok(HelloRequest {
        port,
        cltoken,
        alias,
        avatar_hash,
    })
}

async fn browse_root(state: State<Arc<AppState>>) -> Result<impl IntoResponse, IndexError> {
    browse_path(&state.0, "").await
}

async fn browse(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, IndexError> {
    browse_path(&state, &path).await
}

async fn browse_path(state: &AppState, path: &str) -> Result<axum::response::Response, IndexError> {
    let id = state.fsindex.lookup_path(path).ok_or(IndexError::NotFound)?;
    let snapshot = state.fsindex.snapshot(id).ok_or(IndexError::NotFound)?;

    if snapshot.kind == fs2_core::EntryKind::File {
        return Ok(Redirect::temporary(&format!("/download/{}", snapshot.hash.to_hex()))
            .into_response());
    }

    let mut names: Vec<&str> = snapshot.children.iter().map(|(n, _)| n.as_str()).collect();
    names.sort_unstable();
    let mut body = String::from("<html><body><ul>");
    for name in names {
        body.push_str(&format!("<li><a href=\"{name}\">{name}</a></li>"));
    }
    body.push_str("</ul></body></html>");
    Ok((StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "text/html")], body).into_response())
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    let hits = state.fsindex.search_name(&query.q);
    let mut body = String::from("<html><body><ul>");
    for id in hits {
        if let Some(snapshot) = state.fsindex.snapshot(id) {
            body.push_str(&format!(
                "<li>{} ({})</li>",
                snapshot.name,
                snapshot.hash.to_hex()
            ));
        }
    }
    body.push_str("</ul></body></html>");
    (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "text/html")], body)
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(hex_hash): Path<String>,
) -> Result<impl IntoResponse, IndexError> {
    let hash = Digest::from_hex(&hex_hash).map_err(IndexError::Protocol)?;
    let entries = state.fsindex.search_hash(hash);
    let entry = entries.first().copied().ok_or(IndexError::NotFound)?;
    let snapshot = state.fsindex.snapshot(entry).ok_or(IndexError::NotFound)?;
    let share_uid = snapshot.share.ok_or(IndexError::NotFound)?;
    let owner = state.shares.owner_of(share_uid).ok_or(IndexError::NotFound)?;

    state.fsindex.increment_sent(snapshot.size);
    Ok(Redirect::temporary(&format!(
        "{}/download/{}",
        peer_base_url(owner),
        hex_hash
    )))
}

async fn alternatives(
    State(state): State<Arc<AppState>>,
    Path(hex_hash): Path<String>,
) -> Result<impl IntoResponse, IndexError> {
    let hash = Digest::from_hex(&hex_hash).map_err(IndexError::Protocol)?;
    let entries = state.fsindex.search_hash(hash);

    let mut body = String::from("<html><body><ul>");
    for id in entries {
        if let Some(snapshot) = state.fsindex.snapshot(id) {
            let share_uid = match snapshot.share {
                Some(s) => s,
                None => continue,
            };
            if let Some(owner) = state.shares.owner_of(share_uid) {
                body.push_str(&format!("<li>{}</li>", peer_base_url(owner)));
            }
        }
    }
    body.push_str("</ul></body></html>");
    Ok((StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "text/html")], body))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.stats.get().await;
    axum::Json((*snapshot).clone())
}

/// Avatar rendering is out of scope; this endpoint exists because it is
/// a listed HTTP surface, and returns a fixed 1x1 transparent PNG rather
/// than a real avatar image.
async fn avatar(Path(_filename): Path<String>) -> impl IntoResponse {
    const TRANSPARENT_PIXEL: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];
    (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "image/png")], TRANSPARENT_PIXEL)
}

async fn robots() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain")],
        "User-agent: *\nDisallow: /\n",
    )
}
