//! Client HTTP surface: `/ping` liveness+manifest, `/filelists/{name}.*`
//! exports, and Range-aware `/download/{hash}` file serving.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path as AxPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use fs2_core::filelist::FileListItem;
use fs2_core::hash::Digest;
use fs2_core::protocol::{self, PingSnapshot, ShareManifestEntry};
use fs2_core::types::ShareKind;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::ClientError;
use crate::share_engine::ShareEngine;
use crate::token_bucket::TokenBucket;

pub struct AppState {
    pub alias: String,
    pub shares: Arc<ShareEngine>,
    pub max_upload_slots_per_peer: usize,
    pub upload_bucket: Arc<TokenBucket>,
    peer_slots: DashMap<std::net::IpAddr, Arc<tokio::sync::Semaphore>>,
}

impl AppState {
    pub fn new(alias: String, shares: Arc<ShareEngine>, max_upload_slots_per_peer: usize, upload_bucket: Arc<TokenBucket>) -> Self {
        Self {
            alias,
            shares,
            max_upload_slots_per_peer,
            upload_bucket,
            peer_slots: DashMap::new(),
        }
    }

    fn slot_for(&self, peer: std::net::IpAddr) -> Arc<tokio::sync::Semaphore> {
        self.peer_slots
            .entry(peer)
            .or_insert_with(|| Arc::new(tokio::sync::Semaphore::new(self.max_upload_slots_per_peer)))
            .clone()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/filelists/{filename}", get(filelist))
        .route("/download/{hex_hash}", get(download))
        .with_state(state)
}

async fn ping(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ClientError> {
    let shares: Vec<ShareManifestEntry> = state
        .shares
        .all()
        .into_iter()
        .filter(|s| s.status() == crate::share_engine::ShareStatus::Active)
        .map(|s| ShareManifestEntry {
            name: s.name.clone(),
            revision: s.revision(),
            kind: ShareKind::FileList,
        })
        .collect();

    let snapshot = PingSnapshot {
        alias: state.alias.clone(),
        shares,
    };
    let xml = protocol::encode_ping_xml(&snapshot).map_err(ClientError::Protocol)?;
    Ok((StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "application/xml")], xml))
}

/// Serves a share's file list in whichever of the two flavours the
/// request's extension names (`{name}.xml` or `{name}.FileList`), since
/// the indexnode picks the format based on the share's advertised kind.
async fn filelist(
    State(state): State<Arc<AppState>>,
    AxPath(filename): AxPath<String>,
) -> Result<impl IntoResponse, ClientError> {
    let (name, ext) = filename.rsplit_once('.').ok_or(ClientError::NotFound)?;
    let share = state.shares.get(name).ok_or(ClientError::NotFound)?;
    let tree = share.tree().ok_or(ClientError::NotFound)?;
    let revision = share.revision().to_string();

    match ext {
        "xml" => {
            let xml = fs2_core::filelist::encode_xml(&tree).map_err(ClientError::Protocol)?;
            Ok((
                StatusCode::OK,
                [("content-type", "application/xml"), ("fs2-revision", revision.as_str())],
                xml,
            )
                .into_response())
        }
        "FileList" => {
            let bytes = fs2_core::filelist::encode_binary(&tree);
            Ok((
                StatusCode::OK,
                [("content-type", "application/octet-stream"), ("fs2-revision", revision.as_str())],
                bytes,
            )
                .into_response())
        }
        _ => Err(ClientError::NotFound),
    }
}

/// Resolve a content hash to an on-disk path by walking every active
/// share's tree. Linear in file count; acceptable since this only runs
/// on an actual download hit, not on every browse.
fn resolve_hash(shares: &ShareEngine, hash: Digest) -> Option<PathBuf> {
    for share in shares.all() {
        let tree = share.tree()?;
        if let Some(relative) = find_in_tree(&tree, hash, &mut Vec::new()) {
            let mut path = share.root.clone();
            for segment in relative {
                path.push(segment);
            }
            return Some(path);
        }
    }
    None
}

fn find_in_tree(item: &FileListItem, hash: Digest, trail: &mut Vec<String>) -> Option<Vec<String>> {
    if let Some(children) = &item.children {
        for child in children {
            trail.push(child.name.clone());
            if child.is_file() {
                if child.hash == Some(hash) {
                    return Some(trail.clone());
                }
            } else if let Some(found) = find_in_tree(child, hash, trail) {
                return Some(found);
            }
            trail.pop();
        }
    }
    None
}

struct RangeSpec {
    start: u64,
    end_inclusive: u64,
}

/// Parses a single-range `Range: bytes=...` header value: the three
/// single-range forms (`A-`, `-B`, `A-B`). Multi-range requests are not
/// supported.
fn parse_range(header: &str, len: u64) -> Option<RangeSpec> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;

    if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 || len == 0 {
            return None;
        }
        let start = len.saturating_sub(suffix_len);
        return Some(RangeSpec { start, end_inclusive: len - 1 });
    }

    let start: u64 = start_str.parse().ok()?;
    let end_inclusive = if end_str.is_empty() {
        len.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if start > end_inclusive || start >= len {
        return None;
    }
    Some(RangeSpec {
        start,
        end_inclusive: end_inclusive.min(len.saturating_sub(1)),
    })
}

async fn download(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    AxPath(hex_hash): AxPath<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ClientError> {
    let hash = Digest::from_hex(&hex_hash).map_err(ClientError::Protocol)?;
    let path = resolve_hash(&state.shares, hash).ok_or(ClientError::NotFound)?;

    let slot = state.slot_for(remote.ip());
    let _permit = slot.acquire_owned().await.map_err(|_| ClientError::Cancelled)?;

    let mut file = tokio::fs::File::open(&path).await?;
    let metadata = file.metadata().await?;
    let len = metadata.len();

    let range = headers
        .get(axum::http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, len));

    let (status, start, end_inclusive, total_len) = match range {
        // A malformed or unsatisfiable Range degrades to a full 200 body
        // rather than failing the request.
        Some(r) => (StatusCode::PARTIAL_CONTENT, r.start, r.end_inclusive, len),
        None => (StatusCode::OK, 0, len.saturating_sub(1), len),
    };

    let body_len = end_inclusive.saturating_sub(start) + 1;
    file.seek(std::io::SeekFrom::Start(start)).await?;

    let bucket = state.upload_bucket.clone();
    let limited = file.take(body_len);
    let stream = ReaderStream::new(limited).then(move |chunk| {
        let bucket = bucket.clone();
        async move {
            if let Ok(bytes) = &chunk {
                bucket.acquire(bytes.len() as u64).await;
            }
            chunk
        }
    });

    let mut response = axum::response::Response::builder()
        .status(status)
        .header(axum::http::header::CONTENT_TYPE, "application/octet-stream")
        .header(axum::http::header::CONTENT_LENGTH, body_len.to_string())
        .header(axum::http::header::ACCEPT_RANGES, "bytes");
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            axum::http::header::CONTENT_RANGE,
            format!("bytes {start}-{end_inclusive}/{total_len}"),
        );
    }
    let response = response
        .body(Body::from_stream(stream))
        .map_err(|e| ClientError::Internal(e.to_string()))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_only_range() {
        let r = parse_range("bytes=10-", 100).unwrap();
        assert_eq!(r.start, 10);
        assert_eq!(r.end_inclusive, 99);
    }

    #[test]
    fn parses_suffix_range() {
        let r = parse_range("bytes=-10", 100).unwrap();
        assert_eq!(r.start, 90);
        assert_eq!(r.end_inclusive, 99);
    }

    #[test]
    fn parses_closed_range() {
        let r = parse_range("bytes=5-14", 100).unwrap();
        assert_eq!(r.start, 5);
        assert_eq!(r.end_inclusive, 14);
    }

    #[test]
    fn rejects_out_of_order_range() {
        assert!(parse_range("bytes=50-10", 100).is_none());
    }

    #[test]
    fn rejects_start_past_end_of_file() {
        assert!(parse_range("bytes=500-600", 100).is_none());
    }

    #[tokio::test]
    async fn ping_reports_active_shares_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ShareEngine::new(
            Arc::new(TokenBucket::unlimited()),
            dir.path().join("state"),
        ));
        let share_root = dir.path().join("share");
        std::fs::create_dir_all(&share_root).unwrap();
        let share = engine.add_share("music", share_root);
        engine.refresh(share).await.unwrap();

        let state = Arc::new(AppState::new(
            "bob".into(),
            engine,
            3,
            Arc::new(TokenBucket::unlimited()),
        ));
        let response = ping(State(state)).await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
