//! Per-share file-list build and incremental refresh: a directory walk
//! with a per-volume worker pool, re-hashing a file only when its size,
//! mtime, or hash-version marker has changed since the last build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fs2_core::filelist::FileListItem;
use fs2_core::hash::digest_file;
use parking_lot::RwLock;

use crate::error::ClientError;
use crate::token_bucket::TokenBucket;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareStatus {
    Building,
    Refreshing,
    Active,
    Saving,
    Error,
    Shutdown,
}

/// A stand-in for "volume": the canonicalized share root. Real device-id
/// lookup is platform-specific; keying the per-mount worker pool off the
/// canonical root gets the same "don't thrash one spinning disk" effect
/// without it.
pub type MountId = PathBuf;

pub struct Share {
    pub name: String,
    pub root: PathBuf,
    status: RwLock<ShareStatus>,
    revision: AtomicU64,
    tree: RwLock<Option<FileListItem>>,
    should_stop: AtomicBool,
}

impl Share {
    pub fn status(&self) -> ShareStatus {
        *self.status.read()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    pub fn tree(&self) -> Option<FileListItem> {
        self.tree.read().clone()
    }

    pub fn request_stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }

    fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Relaxed)
    }
}

pub struct ShareEngine {
    shares: DashMap<String, Arc<Share>>,
    mount_pools: DashMap<MountId, Arc<tokio::sync::Semaphore>>,
    hash_bucket: Arc<TokenBucket>,
    state_dir: PathBuf,
    change_tx: tokio::sync::broadcast::Sender<String>,
}

const HIDDEN_PREFIX: char = '.';
const INCOMPLETE_SUFFIX: &str = ".incomplete";
const WORKING_SUFFIX: &str = ".working";

impl ShareEngine {
    pub fn new(hash_bucket: Arc<TokenBucket>, state_dir: PathBuf) -> Self {
        let (change_tx, _rx) = tokio::sync::broadcast::channel(64);
        Self {
            shares: DashMap::new(),
            mount_pools: DashMap::new(),
            hash_bucket,
            state_dir,
            change_tx,
        }
    }

    /// Subscribe to share-refresh-completed notifications, used to
    /// trigger a re-hello to every registered indexnode.
    pub fn subscribe_changes(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.change_tx.subscribe()
    }

    pub fn add_share(&self, name: &str, root: PathBuf) -> Arc<Share> {
        let share = Arc::new(Share {
            name: name.to_string(),
            root,
            status: RwLock::new(ShareStatus::Building),
            revision: AtomicU64::new(0),
            tree: RwLock::new(None),
            should_stop: AtomicBool::new(false),
        });
        self.shares.insert(name.to_string(), share.clone());
        share
    }

    pub fn get(&self, name: &str) -> Option<Arc<Share>> {
        self.shares.get(name).map(|e| e.clone())
    }

    pub fn all(&self) -> Vec<Arc<Share>> {
        self.shares.iter().map(|e| e.value().clone()).collect()
    }

    fn mount_of(&self, root: &Path) -> MountId {
        root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
    }

    fn semaphore_for(&self, mount: &MountId) -> Arc<tokio::sync::Semaphore> {
        self.mount_pools
            .entry(mount.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Semaphore::new(1)))
            .clone()
    }

    /// Refresh one share: acquires that share's mount-point worker slot,
    /// walks the tree, writes the result to disk via the sibling-rename
    /// idiom, and publishes a change notification. Refreshes for shares
    /// on different mounts run concurrently; two shares on the same
    /// mount serialize.
    pub async fn refresh(&self, share: Arc<Share>) -> Result<(), ClientError> {
        let mount = self.mount_of(&share.root);
        let semaphore = self.semaphore_for(&mount);
        let _permit = semaphore.acquire().await.map_err(|_| ClientError::Cancelled)?;

        *share.status.write() = ShareStatus::Refreshing;
        let prior = share.tree();
        let root = share.root.clone();
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        let hash_bucket = self.hash_bucket.clone();

        let mut new_tree = match walk_directory(&canonical_root, &root, prior.as_ref(), &share, &hash_bucket).await {
            Ok(tree) => tree,
            Err(e) => {
                *share.status.write() = ShareStatus::Error;
                return Err(e);
            }
        };
        new_tree.name = share.name.clone();

        *share.status.write() = ShareStatus::Saving;
        self.persist(&share, &new_tree).await?;

        *share.tree.write() = Some(new_tree);
        share.revision.fetch_add(1, Ordering::Relaxed);
        *share.status.write() = ShareStatus::Active;

        let _ = self.change_tx.send(share.name.clone());
        Ok(())
    }

    async fn persist(&self, share: &Share, tree: &FileListItem) -> Result<(), ClientError> {
        let bytes = fs2_core::filelist::encode_binary(tree);
        let path = self.state_dir.join(format!("{}.FileList", share.name));
        tokio::task::spawn_blocking(move || fs2_core::config::write_atomic(&path, &bytes))
            .await
            .map_err(|e| ClientError::Internal(e.to_string()))?
            .map_err(ClientError::Io)?;
        Ok(())
    }

    /// Load a previously persisted file list for `name`, self-healing by
    /// rewriting it if the on-disk internal name differs from the
    /// expected one.
    pub fn load_persisted(&self, name: &str) -> Option<FileListItem> {
        let path = self.state_dir.join(format!("{name}.FileList"));
        let bytes = std::fs::read(&path).ok()?;
        let mut tree = fs2_core::filelist::decode_binary(&bytes).ok()?;
        if tree.name != name {
            tree.name = name.to_string();
            let rewritten = fs2_core::filelist::encode_binary(&tree);
            let _ = fs2_core::config::write_atomic(&path, &rewritten);
        }
        Some(tree)
    }
}

fn is_hidden_non_directory(entry: &std::fs::DirEntry, is_dir: bool) -> bool {
    !is_dir
        && entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with(HIDDEN_PREFIX))
            .unwrap_or(false)
}

fn escapes_root(canonical_root: &Path, target: &Path) -> bool {
    match target.canonicalize() {
        Ok(resolved) => !resolved.starts_with(canonical_root),
        Err(_) => true,
    }
}

/// Recursive, in-order directory walk. `prior` is the matching node from
/// the previous file list, if any.
fn walk_directory<'a>(
    canonical_root: &'a Path,
    dir: &'a Path,
    prior: Option<&'a FileListItem>,
    share: &'a Share,
    hash_bucket: &'a Arc<TokenBucket>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<FileListItem, ClientError>> + Send + 'a>> {
    Box::pin(async move {
        if share.should_stop() {
            return Err(ClientError::Cancelled);
        }

        let prior_children: HashMap<&str, &FileListItem> = prior
            .and_then(|p| p.children.as_ref())
            .map(|children| children.iter().map(|c| (c.name.as_str(), c)).collect())
            .unwrap_or_default();

        let mut seen = std::collections::HashSet::new();
        let mut children = Vec::new();

        let read_dir = tokio::fs::read_dir(dir).await?;
        let mut read_dir = read_dir;
        while let Some(entry) = read_dir.next_entry().await? {
            if share.should_stop() {
                return Err(ClientError::Cancelled);
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(INCOMPLETE_SUFFIX) || name.ends_with(WORKING_SUFFIX) {
                continue;
            }

            let metadata = entry.metadata().await?;
            let is_dir = metadata.is_dir();
            let std_entry_path = dir.join(&name);

            if metadata.is_symlink() && escapes_root(canonical_root, &std_entry_path) {
                continue;
            }
            if !is_dir && name.starts_with(HIDDEN_PREFIX) {
                continue;
            }

            seen.insert(name.clone());
            let prior_child = prior_children.get(name.as_str()).copied();

            if is_dir {
                let item = walk_directory(canonical_root, &std_entry_path, prior_child, share, hash_bucket).await?;
                children.push(item);
            } else {
                let size = metadata.len();
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);

                let needs_rehash = match prior_child {
                    Some(p) if p.is_file() => {
                        p.size != size
                            || p.last_modified != modified
                            || p.hash_version != fs2_core::filelist::CURRENT_HASH_VERSION
                    }
                    _ => true,
                };

                let hash = if needs_rehash {
                    hash_bucket.acquire(size.min(2 * fs2_core::hash::PREFIX_SUFFIX_LEN)).await;
                    let path = std_entry_path.clone();
                    tokio::task::spawn_blocking(move || digest_file(&path, size))
                        .await
                        .map_err(|e| ClientError::Internal(e.to_string()))?
                        .map_err(ClientError::Io)?
                } else {
                    prior_child.and_then(|p| p.hash).unwrap_or(fs2_core::hash::Digest::EMPTY)
                };

                children.push(FileListItem::file(name, size, modified, hash));
            }
        }

        // Names present in prior but not on disk are dropped by simply not
        // including them.
        let _ = seen;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(FileListItem::directory(name, 0, children))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn refresh_builds_tree_and_persists() {
        let dir = tempdir().unwrap();
        let share_root = dir.path().join("share");
        std::fs::create_dir_all(share_root.join("music")).unwrap();
        std::fs::write(share_root.join("music/song.ogg"), b"hello world").unwrap();
        std::fs::write(share_root.join(".hidden"), b"nope").unwrap();
        std::fs::write(share_root.join("partial.incomplete"), b"nope").unwrap();

        let state_dir = dir.path().join("state");
        let engine = ShareEngine::new(Arc::new(TokenBucket::unlimited()), state_dir.clone());
        let share = engine.add_share("myshare", share_root);

        engine.refresh(share.clone()).await.unwrap();

        assert_eq!(share.status(), ShareStatus::Active);
        assert_eq!(share.revision(), 1);

        let tree = share.tree().unwrap();
        assert_eq!(tree.children.as_ref().unwrap().len(), 1);
        let music = &tree.children.as_ref().unwrap()[0];
        assert_eq!(music.name, "music");
        assert_eq!(music.children.as_ref().unwrap().len(), 1);

        assert!(state_dir.join("myshare.FileList").exists());
        assert!(!state_dir.join("myshare.FileList.working").exists());
    }

    #[tokio::test]
    async fn unchanged_file_retains_prior_hash_without_rehash() {
        let dir = tempdir().unwrap();
        let share_root = dir.path().join("share");
        std::fs::create_dir_all(&share_root).unwrap();
        std::fs::write(share_root.join("a.txt"), b"content").unwrap();

        let state_dir = dir.path().join("state");
        let engine = ShareEngine::new(Arc::new(TokenBucket::unlimited()), state_dir);
        let share = engine.add_share("s", share_root);

        engine.refresh(share.clone()).await.unwrap();
        let first_hash = share.tree().unwrap().children.as_ref().unwrap()[0].hash;

        engine.refresh(share.clone()).await.unwrap();
        let second_hash = share.tree().unwrap().children.as_ref().unwrap()[0].hash;

        assert_eq!(first_hash, second_hash);
        assert_eq!(share.revision(), 2);
    }

    #[tokio::test]
    async fn removed_file_drops_out_of_next_refresh() {
        let dir = tempdir().unwrap();
        let share_root = dir.path().join("share");
        std::fs::create_dir_all(&share_root).unwrap();
        std::fs::write(share_root.join("a.txt"), b"content").unwrap();

        let state_dir = dir.path().join("state");
        let engine = ShareEngine::new(Arc::new(TokenBucket::unlimited()), state_dir);
        let share = engine.add_share("s", share_root.clone());
        engine.refresh(share.clone()).await.unwrap();
        assert_eq!(share.tree().unwrap().children.as_ref().unwrap().len(), 1);

        std::fs::remove_file(share_root.join("a.txt")).unwrap();
        engine.refresh(share.clone()).await.unwrap();
        assert!(share.tree().unwrap().children.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_notifies_subscribers() {
        let dir = tempdir().unwrap();
        let share_root = dir.path().join("share");
        std::fs::create_dir_all(&share_root).unwrap();

        let state_dir = dir.path().join("state");
        let engine = ShareEngine::new(Arc::new(TokenBucket::unlimited()), state_dir);
        let mut rx = engine.subscribe_changes();
        let share = engine.add_share("s", share_root);

        engine.refresh(share).await.unwrap();
        let name = rx.recv().await.unwrap();
        assert_eq!(name, "s");
    }
}
