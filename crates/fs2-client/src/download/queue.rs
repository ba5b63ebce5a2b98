//! Persisted download queue: a tree of download directories and download
//! files. Mirrors the share-engine's directory shape so the scheduler
//! can walk it the same way, but each file node additionally carries
//! `saveAs`, expected `hash`/`size`, a `dispatchId` grouping sibling
//! downloads queued together, and in-flight progress. Persisted as JSON
//! rather than a binary format since this state is local-only, never
//! sent over the wire, and benefits from being human-inspectable.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fs2_core::hash::Digest;
use fs2_core::types::DispatchId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Pending,
    Active,
    Done,
    Failed,
    /// Every peer that could provide this file was tried and failed or
    /// had no copy; dispatch-id coalescing marks the whole batch this
    /// way together rather than retrying forever.
    NoSources,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedFile {
    pub save_as: PathBuf,
    #[serde(with = "hash_hex")]
    pub hash: Digest,
    pub size: u64,
    pub dispatch_id: DispatchId,
    pub status: FileStatus,
    pub bytes_fetched: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedDirectory {
    pub name: String,
    pub children: Vec<QueueNode>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum QueueNode {
    File(QueuedFile),
    Directory(QueuedDirectory),
}

mod hash_hex {
    use fs2_core::hash::Digest;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Digest, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hash.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Digest, D::Error> {
        let s = String::deserialize(d)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The persisted download queue, keyed by a per-run next-dispatch-id
/// counter and a root list of directories/files to fetch.
pub struct DownloadQueue {
    root: RwLock<Vec<QueueNode>>,
    state_path: PathBuf,
    next_dispatch: AtomicU64,
}

impl DownloadQueue {
    pub fn new(state_path: PathBuf) -> Self {
        let loaded: Vec<QueueNode> = std::fs::read(&state_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        let next = max_dispatch_id(&loaded) + 1;
        Self {
            root: RwLock::new(loaded),
            state_path,
            next_dispatch: AtomicU64::new(next),
        }
    }

    pub fn next_dispatch_id(&self) -> DispatchId {
        DispatchId(self.next_dispatch.fetch_add(1, Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> Vec<QueueNode> {
        self.root.read().clone()
    }

    /// Enqueue a single file under `path_components` (directory names
    /// leading to the file), creating any intermediate directory nodes
    /// that don't yet exist. A no-op if a file with the same `save_as`
    /// is already queued in that directory.
    pub fn enqueue(&self, path_components: &[String], save_as: PathBuf, hash: Digest, size: u64, dispatch_id: DispatchId) {
        let mut root = self.root.write();
        insert(&mut root, path_components, save_as, hash, size, dispatch_id);
        drop(root);
        self.persist();
    }

    pub fn set_status(&self, save_as: &Path, status: FileStatus) {
        let mut root = self.root.write();
        set_status(&mut root, save_as, status);
        drop(root);
        self.persist();
    }

    pub fn record_progress(&self, save_as: &Path, bytes_fetched: u64) {
        let mut root = self.root.write();
        record_progress(&mut root, save_as, bytes_fetched);
    }

    /// All pending (not yet Done/NoSources) files, depth-first.
    pub fn pending_files(&self) -> Vec<QueuedFile> {
        let root = self.root.read();
        let mut out = Vec::new();
        collect_pending(&root, &mut out);
        out
    }

    fn persist(&self) {
        let root = self.root.read();
        if let Ok(bytes) = serde_json::to_vec_pretty(&*root) {
            let _ = fs2_core::config::write_atomic(&self.state_path, &bytes);
        }
    }
}

fn max_dispatch_id(nodes: &[QueueNode]) -> u64 {
    nodes
        .iter()
        .map(|n| match n {
            QueueNode::File(f) => f.dispatch_id.0,
            QueueNode::Directory(d) => max_dispatch_id(&d.children),
        })
        .max()
        .unwrap_or(0)
}

fn insert(
    nodes: &mut Vec<QueueNode>,
    path_components: &[String],
    save_as: PathBuf,
    hash: Digest,
    size: u64,
    dispatch_id: DispatchId,
) {
    match path_components.split_first() {
        None => {
            let already_queued = nodes.iter().any(|n| match n {
                QueueNode::File(f) => f.save_as == save_as,
                _ => false,
            });
            if already_queued {
                return;
            }
            nodes.push(QueueNode::File(QueuedFile {
                save_as,
                hash,
                size,
                dispatch_id,
                status: FileStatus::Pending,
                bytes_fetched: 0,
            }));
        }
        Some((head, rest)) => {
            let existing = nodes.iter_mut().find_map(|n| match n {
                QueueNode::Directory(d) if d.name == *head => Some(d),
                _ => None,
            });
            let dir = match existing {
                Some(d) => d,
                None => {
                    nodes.push(QueueNode::Directory(QueuedDirectory {
                        name: head.clone(),
                        children: Vec::new(),
                    }));
                    match nodes.last_mut().unwrap() {
                        QueueNode::Directory(d) => d,
                        _ => unreachable!(),
                    }
                }
            };
            insert(&mut dir.children, rest, save_as, hash, size, dispatch_id);
        }
    }
}

fn set_status(nodes: &mut [QueueNode], save_as: &Path, status: FileStatus) {
    for node in nodes {
        match node {
            QueueNode::File(f) if f.save_as == save_as => {
                f.status = status;
                return;
            }
            QueueNode::Directory(d) => set_status(&mut d.children, save_as, status.clone()),
            _ => {}
        }
    }
}

fn record_progress(nodes: &mut [QueueNode], save_as: &Path, bytes_fetched: u64) {
    for node in nodes {
        match node {
            QueueNode::File(f) if f.save_as == save_as => {
                f.bytes_fetched = bytes_fetched;
                return;
            }
            QueueNode::Directory(d) => record_progress(&mut d.children, save_as, bytes_fetched),
            _ => {}
        }
    }
}

fn collect_pending(nodes: &[QueueNode], out: &mut Vec<QueuedFile>) {
    for node in nodes {
        match node {
            QueueNode::File(f) if matches!(f.status, FileStatus::Pending | FileStatus::Active) => {
                out.push(f.clone());
            }
            QueueNode::Directory(d) => collect_pending(&d.children, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn digest(b: u8) -> Digest {
        Digest([b; 32])
    }

    #[test]
    fn enqueue_nests_into_directory_tree() {
        let dir = tempdir().unwrap();
        let queue = DownloadQueue::new(dir.path().join("queue.json"));
        let dispatch = queue.next_dispatch_id();
        queue.enqueue(
            &["music".to_string()],
            PathBuf::from("/downloads/music/song.ogg"),
            digest(1),
            1024,
            dispatch,
        );

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        match &snapshot[0] {
            QueueNode::Directory(d) => {
                assert_eq!(d.name, "music");
                assert_eq!(d.children.len(), 1);
            }
            _ => panic!("expected directory"),
        }
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        {
            let queue = DownloadQueue::new(path.clone());
            let dispatch = queue.next_dispatch_id();
            queue.enqueue(&[], PathBuf::from("/downloads/a.bin"), digest(2), 10, dispatch);
        }
        let reloaded = DownloadQueue::new(path);
        assert_eq!(reloaded.pending_files().len(), 1);
    }

    #[test]
    fn next_dispatch_id_continues_after_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let first_dispatch = {
            let queue = DownloadQueue::new(path.clone());
            let dispatch = queue.next_dispatch_id();
            queue.enqueue(&[], PathBuf::from("/downloads/a.bin"), digest(3), 10, dispatch);
            dispatch
        };
        let reloaded = DownloadQueue::new(path);
        let next = reloaded.next_dispatch_id();
        assert!(next.0 > first_dispatch.0);
    }

    #[test]
    fn status_transitions_remove_from_pending() {
        let dir = tempdir().unwrap();
        let queue = DownloadQueue::new(dir.path().join("queue.json"));
        let dispatch = queue.next_dispatch_id();
        let path = PathBuf::from("/downloads/a.bin");
        queue.enqueue(&[], path.clone(), digest(4), 10, dispatch);
        assert_eq!(queue.pending_files().len(), 1);

        queue.set_status(&path, FileStatus::Done);
        assert_eq!(queue.pending_files().len(), 0);
    }

    #[test]
    fn duplicate_enqueue_is_a_no_op() {
        let dir = tempdir().unwrap();
        let queue = DownloadQueue::new(dir.path().join("queue.json"));
        let save_as = PathBuf::from("/downloads/music/song.ogg");

        let first = queue.next_dispatch_id();
        queue.enqueue(&["music".to_string()], save_as.clone(), digest(5), 1024, first);

        let second = queue.next_dispatch_id();
        queue.enqueue(&["music".to_string()], save_as, digest(5), 1024, second);

        assert_eq!(queue.pending_files().len(), 1);
        match &queue.snapshot()[0] {
            QueueNode::Directory(d) => assert_eq!(d.children.len(), 1),
            _ => panic!("expected directory"),
        }
    }
}
