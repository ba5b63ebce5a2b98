//! Share diffing, scheduling, and refresh: diffs an incoming manifest
//! against known state and spawns bounded refresh work, coalescing
//! repeated pending-revision bumps and applying an asymmetric rollback
//! policy on failure (see `refresh_one`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fs2_core::filelist::FileListItem;
use fs2_core::protocol::ShareManifestEntry;
use fs2_core::types::{PeerIdentity, ShareKind};

use crate::fsindex::{EntryId, FilesystemIndex, ShareUid};

/// Failure categories a fetch can produce, distinguishing the rollback
/// case from the "poison" case.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// 404 / share not found on the peer.
    NotFound,
    /// Any network-level I/O failure.
    Network(String),
    /// Anything else (parse failure, unexpected peer behaviour).
    Other(String),
}

/// Fetches a share's full file list from its owning peer. Implemented by
/// `fs2-index`'s HTTP client layer; abstracted here so `share_importer`
/// has no direct `reqwest` dependency and can be unit tested with a fake.
#[async_trait]
pub trait ShareFetcher: Send + Sync {
    async fn fetch(
        &self,
        owner: PeerIdentity,
        share_name: &str,
        kind: ShareKind,
    ) -> Result<(u64, FileListItem), FetchError>;
}

pub struct ShareState {
    pub name: String,
    pub owner: PeerIdentity,
    pub kind: ShareKind,
    pub uid: ShareUid,
    revision: AtomicU64,
    pending_revision: AtomicU64,
    listed: AtomicBool,
    delisted: AtomicBool,
    poisoned: AtomicBool,
    /// The pending revision value at which this share was poisoned; a
    /// later `reconcile` raising pending past this clears it.
    poisoned_at: AtomicU64,
    in_refresh: AtomicBool,
    /// Root of this share's grafted subtree in the fsindex, 0 if never
    /// successfully imported. Needed so `delist` can erase it.
    entry_id: AtomicU64,
}

impl ShareState {
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    pub fn pending_revision(&self) -> u64 {
        self.pending_revision.load(Ordering::Relaxed)
    }

    pub fn is_delisted(&self) -> bool {
        self.delisted.load(Ordering::Relaxed)
    }

    pub fn is_listed(&self) -> bool {
        self.listed.load(Ordering::Relaxed)
    }

    /// Root of this share's grafted subtree, if it has ever been
    /// successfully imported.
    pub fn entry_id(&self) -> Option<EntryId> {
        match self.entry_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    /// A share is queued for refresh iff its pending revision exceeds its
    /// current one, it is not delisted, and it is not poisoned at that
    /// pending revision.
    fn needs_refresh(&self) -> bool {
        if self.delisted.load(Ordering::Relaxed) {
            return false;
        }
        let pending = self.pending_revision();
        if pending <= self.revision() {
            return false;
        }
        if self.poisoned.load(Ordering::Relaxed) && pending <= self.poisoned_at.load(Ordering::Relaxed) {
            return false;
        }
        true
    }
}

/// Per-peer share bookkeeping plus the bounded refresh worker pool.
pub struct ShareImporter {
    fsindex: Arc<FilesystemIndex>,
    /// (peer, share name) -> share state.
    shares: DashMap<(PeerIdentity, String), Arc<ShareState>>,
    next_uid: AtomicU64,
    refresh_semaphore: Arc<tokio::sync::Semaphore>,
}

impl ShareImporter {
    pub fn new(fsindex: Arc<FilesystemIndex>, refresh_workers: usize) -> Self {
        Self {
            fsindex,
            shares: DashMap::new(),
            next_uid: AtomicU64::new(1),
            refresh_semaphore: Arc::new(tokio::sync::Semaphore::new(refresh_workers.max(1))),
        }
    }

    /// Resolve which peer owns the share tagged with `uid`, used when an
    /// indexnode HTTP handler needs to redirect a download to its source.
    pub fn owner_of(&self, uid: ShareUid) -> Option<PeerIdentity> {
        self.shares.iter().find(|e| e.value().uid == uid).map(|e| e.value().owner)
    }

    pub fn shares_for(&self, peer: PeerIdentity) -> Vec<Arc<ShareState>> {
        self.shares
            .iter()
            .filter(|e| e.key().0 == peer)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Diff `manifest` (from a peer's `/ping` response) against the
    /// indexnode's known shares for that peer:
    ///
    /// - known-only entries are delisted.
    /// - peer-only entries are added with a pending refresh scheduled.
    /// - entries on both sides bump `pendingRevision` if the peer's
    ///   revision is newer.
    ///
    /// Returns the shares now eligible for refresh scheduling.
    pub fn reconcile(
        &self,
        peer: PeerIdentity,
        manifest: &[ShareManifestEntry],
    ) -> Vec<Arc<ShareState>> {
        let known: Vec<String> = self
            .shares
            .iter()
            .filter(|e| e.key().0 == peer)
            .map(|e| e.key().1.clone())
            .collect();

        let manifest_names: std::collections::HashSet<&str> =
            manifest.iter().map(|m| m.name.as_str()).collect();

        for name in &known {
            if !manifest_names.contains(name.as_str()) {
                self.delist(peer, name);
            }
        }

        let mut eligible = Vec::new();
        for entry in manifest {
            let key = (peer, entry.name.clone());
            let share = self.shares.entry(key).or_insert_with(|| {
                Arc::new(ShareState {
                    name: entry.name.clone(),
                    owner: peer,
                    kind: entry.kind,
                    uid: self.next_uid.fetch_add(1, Ordering::Relaxed),
                    revision: AtomicU64::new(0),
                    pending_revision: AtomicU64::new(0),
                    listed: AtomicBool::new(true),
                    delisted: AtomicBool::new(false),
                    poisoned: AtomicBool::new(false),
                    poisoned_at: AtomicU64::new(0),
                    in_refresh: AtomicBool::new(false),
                    entry_id: AtomicU64::new(0),
                })
            });

            if entry.revision > share.pending_revision() {
                share.pending_revision.store(entry.revision, Ordering::Relaxed);
                if share.poisoned.load(Ordering::Relaxed)
                    && entry.revision > share.poisoned_at.load(Ordering::Relaxed)
                {
                    share.poisoned.store(false, Ordering::Relaxed);
                }
            }

            if share.needs_refresh() {
                eligible.push(share.clone());
            }
        }

        eligible
    }

    /// `delisted` is terminal: remove from the fsindex, mark terminal,
    /// drop from the share map.
    pub fn delist(&self, peer: PeerIdentity, share_name: &str) {
        if let Some((_, share)) = self.shares.remove(&(peer, share_name.to_string())) {
            share.delisted.store(true, Ordering::Relaxed);
            share.listed.store(false, Ordering::Relaxed);
            if let Some(entry) = share.entry_id() {
                self.fsindex.erase(entry);
            }
        }
    }

    pub fn delist_all(&self, peer: PeerIdentity) {
        let names: Vec<String> = self
            .shares
            .iter()
            .filter(|e| e.key().0 == peer)
            .map(|e| e.key().1.clone())
            .collect();
        for name in names {
            self.delist(peer, &name);
        }
    }

    /// Spawn bounded refresh tasks for `eligible`, grafting each share's
    /// fetched tree under `peer_root` in the filesystem index.
    pub fn schedule_refreshes(
        self: &Arc<Self>,
        eligible: Vec<Arc<ShareState>>,
        peer_root: EntryId,
        fetcher: Arc<dyn ShareFetcher>,
    ) {
        for share in eligible {
            let importer = self.clone();
            let fetcher = fetcher.clone();
            let semaphore = self.refresh_semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                importer.refresh_one(share, peer_root, fetcher.as_ref()).await;
            });
        }
    }

    /// Fetch, parse, and graft a single share's file list. At-most-one
    /// refresh per share is enforced by `in_refresh`. A transient fetch
    /// failure rolls the pending revision back to the last known-good
    /// one so the next hello can retry cleanly; a parse or import
    /// failure instead poisons the share at that pending revision, since
    /// the peer's data was reachable but invalid and retrying the same
    /// bytes would just poison again.
    pub async fn refresh_one(&self, share: Arc<ShareState>, peer_root: EntryId, fetcher: &dyn ShareFetcher) {
        if share
            .in_refresh
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if !share.needs_refresh() {
            share.in_refresh.store(false, Ordering::Release);
            return;
        }

        let result = fetcher.fetch(share.owner, &share.name, share.kind).await;
        match result {
            Ok((revision, tree)) => {
                match self.fsindex.import_share(peer_root, &share.name, &tree, share.uid) {
                    Ok(entry) => {
                        share.revision.store(revision, Ordering::Relaxed);
                        share.entry_id.store(entry, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(share = %share.name, ?e, "share import rejected, poisoning");
                        share.poisoned.store(true, Ordering::Relaxed);
                        share
                            .poisoned_at
                            .store(share.pending_revision(), Ordering::Relaxed);
                    }
                }
            }
            Err(FetchError::NotFound) | Err(FetchError::Network(_)) => {
                tracing::warn!(share = %share.name, "transient failure refreshing share, rolling pending back");
                share
                    .pending_revision
                    .store(share.revision(), Ordering::Relaxed);
            }
            Err(FetchError::Other(msg)) => {
                tracing::error!(share = %share.name, error = %msg, "non-network failure refreshing share, poisoning");
                share.poisoned.store(true, Ordering::Relaxed);
                share
                    .poisoned_at
                    .store(share.pending_revision(), Ordering::Relaxed);
            }
        }

        share.in_refresh.store(false, Ordering::Release);
    }
}
