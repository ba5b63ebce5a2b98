//! The indexnode's in-memory aggregated filesystem: one tree merging every
//! registered client's shares, plus the hash and keyword secondary
//! indices. An arena of ids with parent/child links, rather than a flat
//! inode table, so that path lookup and subtree erase are cheap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use fs2_core::hash::Digest;
use fs2_core::keyword::keywords_for;
use fs2_core::types::EntryKind;
use fs2_core::MAX_SEARCH_RESULTS;
use parking_lot::RwLock;

/// Arena index of an entry. The root is always 1.
pub type EntryId = u64;

pub const ROOT_ENTRY: EntryId = 1;
const FIRST_ENTRY: EntryId = 2;

/// Opaque identifier for a share, assigned by the share importer.
pub type ShareUid = u64;

struct EntryNode {
    name: String,
    kind: EntryKind,
    parent: Option<EntryId>,
    /// Populated only for directories.
    children: HashMap<String, EntryId>,
    size: u64,
    link_count: u32,
    hash: Digest,
    share: Option<ShareUid>,
}

impl EntryNode {
    fn new_dir(name: String, parent: Option<EntryId>) -> Self {
        Self {
            name,
            kind: EntryKind::Directory,
            parent,
            children: HashMap::new(),
            size: 0,
            link_count: 2,
            hash: Digest::EMPTY,
            share: None,
        }
    }

    fn new_file(name: String, parent: EntryId, size: u64, hash: Digest, share: ShareUid) -> Self {
        Self {
            name,
            kind: EntryKind::File,
            parent: Some(parent),
            children: HashMap::new(),
            size,
            link_count: 1,
            hash,
            share: Some(share),
        }
    }
}

/// Snapshot of one entry's public attributes, safe to hand to callers
/// without holding any lock.
#[derive(Clone, Debug)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub link_count: u32,
    pub hash: Digest,
    pub share: Option<ShareUid>,
    pub children: Vec<(String, EntryId)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    ParentNotDirectory,
    ParentMissing,
    BadHash(String),
}

/// The aggregated filesystem index. Three locks, acquired in the fixed
/// order `hash_index` → `keyword_index` → `entries` whenever a mutation
/// needs more than one. No lock is ever held
/// across network or disk I/O — callers snapshot, release, do I/O,
/// then recommit.
pub struct FilesystemIndex {
    entries: RwLock<HashMap<EntryId, EntryNode>>,
    hash_index: RwLock<HashMap<Digest, std::collections::HashSet<EntryId>>>,
    keyword_index: RwLock<HashMap<String, std::collections::HashSet<EntryId>>>,
    next_id: AtomicU64,
    estimated_transfer: AtomicU64,
}

impl Default for FilesystemIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemIndex {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(ROOT_ENTRY, EntryNode::new_dir(String::new(), None));
        Self {
            entries: RwLock::new(entries),
            hash_index: RwLock::new(HashMap::new()),
            keyword_index: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(FIRST_ENTRY),
            estimated_transfer: AtomicU64::new(0),
        }
    }

    fn alloc_id(&self) -> EntryId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Path lookup
    // ------------------------------------------------------------------

    /// Split on `/`, skip empty segments, walk children case-sensitively.
    /// Lookup of the root (empty path) returns [`ROOT_ENTRY`].
    pub fn lookup_path(&self, path: &str) -> Option<EntryId> {
        let entries = self.entries.read();
        let mut current = ROOT_ENTRY;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let node = entries.get(&current)?;
            current = *node.children.get(segment)?;
        }
        Some(current)
    }

    pub fn snapshot(&self, id: EntryId) -> Option<EntrySnapshot> {
        let entries = self.entries.read();
        let node = entries.get(&id)?;
        Some(EntrySnapshot {
            id,
            name: node.name.clone(),
            kind: node.kind,
            size: node.size,
            link_count: node.link_count,
            hash: node.hash,
            share: node.share,
            children: node
                .children
                .iter()
                .map(|(n, i)| (n.clone(), *i))
                .collect(),
        })
    }

    /// Full slash-joined path from root to `id`, used to break ties when
    /// picking a representative for a hash class.
    pub fn entry_path(&self, id: EntryId) -> String {
        let entries = self.entries.read();
        let mut parts = Vec::new();
        let mut current = id;
        while let Some(node) = entries.get(&current) {
            if current == ROOT_ENTRY {
                break;
            }
            parts.push(node.name.clone());
            match node.parent {
                Some(p) => current = p,
                None => break,
            }
        }
        parts.reverse();
        parts.join("/")
    }

    // ------------------------------------------------------------------
    // Client registration
    // ------------------------------------------------------------------

    /// Create a per-client container directory under root, named `alias`.
    /// Returns its entry id, the per-client "root" used for all of that
    /// client's shares.
    pub fn register_client(&self, alias: &str) -> EntryId {
        let id = self.alloc_id();
        {
            let mut entries = self.entries.write();
            entries.insert(id, EntryNode::new_dir(alias.to_string(), Some(ROOT_ENTRY)));
            link_child(&mut entries, ROOT_ENTRY, alias.to_string(), id);
        }
        self.index_name(id, alias);
        self.propagate_link_count(ROOT_ENTRY);
        id
    }

    pub fn deregister_client(&self, client_root: EntryId) {
        self.erase(client_root);
    }

    // ------------------------------------------------------------------
    // Share import
    // ------------------------------------------------------------------

    /// Graft `children` (a flat list of files/directories, already
    /// validated by the share importer) under `parent` as a directory
    /// named `share_name`, tagging every file with `share`. If a share by
    /// that name already exists under `parent` it is erased first. The
    /// importer is responsible for not calling this until the whole
    /// subtree is ready to graft in one shot.
    pub fn import_share(
        &self,
        parent: EntryId,
        share_name: &str,
        tree: &fs2_core::filelist::FileListItem,
        share: ShareUid,
    ) -> Result<EntryId, ImportError> {
        if let Some(existing) = {
            let entries = self.entries.read();
            entries
                .get(&parent)
                .and_then(|p| p.children.get(share_name))
                .copied()
        } {
            self.erase(existing);
        }

        let share_root = self.alloc_id();
        {
            let mut entries = self.entries.write();
            if !entries
                .get(&parent)
                .map(|p| p.kind == EntryKind::Directory)
                .unwrap_or(false)
            {
                return Err(ImportError::ParentNotDirectory);
            }
            entries.insert(
                share_root,
                EntryNode::new_dir(share_name.to_string(), Some(parent)),
            );
            link_child(&mut entries, parent, share_name.to_string(), share_root);
        }
        self.index_name(share_root, share_name);

        let mut skipped = Vec::new();
        self.graft_children(share_root, tree, share, &mut skipped);
        if !skipped.is_empty() {
            tracing::warn!(count = skipped.len(), "skipped corrupt entries during import");
        }

        self.rebuild_aggregates(share_root);
        self.propagate_link_count(parent);
        Ok(share_root)
    }

    fn graft_children(
        &self,
        parent: EntryId,
        tree: &fs2_core::filelist::FileListItem,
        share: ShareUid,
        skipped: &mut Vec<String>,
    ) {
        let children = match &tree.children {
            Some(c) => c,
            None => return,
        };
        for child in children {
            if child.is_dir() {
                let id = self.alloc_id();
                {
                    let mut entries = self.entries.write();
                    entries.insert(id, EntryNode::new_dir(child.name.clone(), Some(parent)));
                    link_child(&mut entries, parent, child.name.clone(), id);
                }
                self.index_name(id, &child.name);
                self.graft_children(id, child, share, skipped);
                self.rebuild_aggregates(id);
            } else {
                let hash = match child.hash {
                    Some(h) if !h.is_empty() => h,
                    _ => {
                        skipped.push(child.name.clone());
                        continue;
                    }
                };
                let id = self.alloc_id();
                {
                    let mut hash_index = self.hash_index.write();
                    let mut keyword_index = self.keyword_index.write();
                    let mut entries = self.entries.write();
                    entries.insert(
                        id,
                        EntryNode::new_file(child.name.clone(), parent, child.size, hash, share),
                    );
                    link_child(&mut entries, parent, child.name.clone(), id);
                    hash_index.entry(hash).or_default().insert(id);
                    for kw in keywords_for(&child.name) {
                        keyword_index.entry(kw).or_default().insert(id);
                    }
                }
            }
        }
    }

    fn rebuild_aggregates(&self, dir: EntryId) {
        let mut entries = self.entries.write();
        recompute_size(&mut entries, dir);
        recompute_link_count(&mut entries, dir);
    }

    fn propagate_link_count(&self, dir: EntryId) {
        let mut entries = self.entries.write();
        recompute_link_count(&mut entries, dir);
        propagate_size_upward(&mut entries, dir);
    }

    fn index_name(&self, id: EntryId, name: &str) {
        let mut keyword_index = self.keyword_index.write();
        for kw in keywords_for(name) {
            keyword_index.entry(kw).or_default().insert(id);
        }
    }

    // ------------------------------------------------------------------
    // Erase
    // ------------------------------------------------------------------

    /// Remove the subtree rooted at `id` from both indices and from its
    /// parent's children map, atomically with respect to concurrent
    /// readers: hash and keyword postings are cleared before `entries` is
    /// mutated, under the fixed lock order.
    pub fn erase(&self, id: EntryId) {
        if id == ROOT_ENTRY {
            return;
        }
        let parent = {
            let entries = self.entries.read();
            entries.get(&id).and_then(|n| n.parent)
        };

        let mut hash_index = self.hash_index.write();
        let mut keyword_index = self.keyword_index.write();
        let mut entries = self.entries.write();

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = entries.get(&current) {
                for kw in keywords_for(&node.name) {
                    if let Some(set) = keyword_index.get_mut(&kw) {
                        set.remove(&current);
                        if set.is_empty() {
                            keyword_index.remove(&kw);
                        }
                    }
                }
                if node.kind == EntryKind::File {
                    if let Some(set) = hash_index.get_mut(&node.hash) {
                        set.remove(&current);
                        if set.is_empty() {
                            hash_index.remove(&node.hash);
                        }
                    }
                }
                stack.extend(node.children.values().copied());
            }
            entries.remove(&current);
        }

        if let Some(parent_id) = parent {
            if let Some(parent_node) = entries.get_mut(&parent_id) {
                parent_node.children.retain(|_, v| *v != id);
            }
            recompute_link_count(&mut entries, parent_id);
            propagate_size_upward(&mut entries, parent_id);
        }
    }

    // ------------------------------------------------------------------
    // Rename (peer alias change)
    // ------------------------------------------------------------------

    /// Detach from the parent map under the old name and reinsert under
    /// the new one, updating keyword postings; the hash index is
    /// unaffected since content hashes don't depend on names.
    pub fn rename(&self, id: EntryId, new_name: &str) {
        let mut keyword_index = self.keyword_index.write();
        let mut entries = self.entries.write();

        let (parent, old_name) = match entries.get(&id) {
            Some(n) => (n.parent, n.name.clone()),
            None => return,
        };

        for kw in keywords_for(&old_name) {
            if let Some(set) = keyword_index.get_mut(&kw) {
                set.remove(&id);
                if set.is_empty() {
                    keyword_index.remove(&kw);
                }
            }
        }

        if let Some(parent_id) = parent {
            if let Some(parent_node) = entries.get_mut(&parent_id) {
                parent_node.children.remove(&old_name);
                parent_node.children.insert(new_name.to_string(), id);
            }
        }

        if let Some(node) = entries.get_mut(&id) {
            node.name = new_name.to_string();
        }

        for kw in keywords_for(new_name) {
            keyword_index.entry(kw).or_default().insert(id);
        }
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Intersection of per-keyword posting lists in input order.
    /// Deduplicates files by hash *after* intersection, keeping directory
    /// hits always; capped at
    /// [`MAX_SEARCH_RESULTS`].
    pub fn search_name(&self, query: &str) -> Vec<EntryId> {
        let keywords = keywords_for(query);
        if keywords.is_empty() {
            return Vec::new();
        }

        let keyword_index = self.keyword_index.read();
        let mut result: Option<std::collections::HashSet<EntryId>> = None;
        for kw in &keywords {
            let posting = keyword_index.get(kw).cloned().unwrap_or_default();
            result = Some(match result {
                Some(acc) => acc.intersection(&posting).copied().collect(),
                None => posting,
            });
            if result.as_ref().map(|s| s.is_empty()).unwrap_or(true) {
                return Vec::new();
            }
        }
        drop(keyword_index);

        let mut ids: Vec<EntryId> = result.unwrap_or_default().into_iter().collect();
        ids.sort_unstable();

        let entries = self.entries.read();
        let mut seen_hashes = std::collections::HashSet::new();
        let mut out = Vec::new();
        for id in ids {
            if let Some(node) = entries.get(&id) {
                if node.kind == EntryKind::File {
                    if !seen_hashes.insert(node.hash) {
                        continue;
                    }
                }
                out.push(id);
                if out.len() >= MAX_SEARCH_RESULTS {
                    break;
                }
            }
        }
        out
    }

    /// All entries sharing `hash` ("alternatives").
    pub fn search_hash(&self, hash: Digest) -> Vec<EntryId> {
        self.hash_index
            .read()
            .get(&hash)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sort hash equivalence classes by descending cardinality, one
    /// representative per class (lexicographically first full path among
    /// the class's members), top `limit`.
    pub fn popular_files(&self, limit: usize) -> Vec<EntryId> {
        let hash_index = self.hash_index.read();
        let mut classes: Vec<(usize, Digest)> = hash_index
            .iter()
            .map(|(hash, members)| (members.len(), *hash))
            .collect();
        classes.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out = Vec::new();
        for (_, hash) in classes.into_iter().take(limit) {
            let members = &hash_index[&hash];
            let mut best: Option<(String, EntryId)> = None;
            for &id in members {
                let path = self.entry_path(id);
                if best.as_ref().map(|(p, _)| path < *p).unwrap_or(true) {
                    best = Some((path, id));
                }
            }
            if let Some((_, id)) = best {
                out.push(id);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    pub fn total_size(&self) -> u64 {
        self.entries
            .read()
            .get(&ROOT_ENTRY)
            .map(|n| n.size)
            .unwrap_or(0)
    }

    pub fn unique_size(&self) -> u64 {
        let hash_index = self.hash_index.read();
        let entries = self.entries.read();
        hash_index
            .keys()
            .filter_map(|hash| {
                hash_index[hash]
                    .iter()
                    .next()
                    .and_then(|id| entries.get(id))
                    .map(|n| n.size)
            })
            .sum()
    }

    pub fn count_files(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|n| n.kind == EntryKind::File)
            .count()
    }

    pub fn count_unique_files(&self) -> usize {
        self.hash_index.read().len()
    }

    pub fn increment_sent(&self, bytes: u64) {
        self.estimated_transfer.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn estimated_transfer(&self) -> u64 {
        self.estimated_transfer.load(Ordering::Relaxed)
    }
}

fn link_child(
    entries: &mut HashMap<EntryId, EntryNode>,
    parent: EntryId,
    name: String,
    child: EntryId,
) {
    if let Some(parent_node) = entries.get_mut(&parent) {
        parent_node.children.insert(name, child);
    }
}

fn recompute_size(entries: &mut HashMap<EntryId, EntryNode>, id: EntryId) {
    let child_ids: Vec<EntryId> = match entries.get(&id) {
        Some(n) if n.kind == EntryKind::Directory => n.children.values().copied().collect(),
        _ => return,
    };
    for c in &child_ids {
        recompute_size(entries, *c);
    }
    let total: u64 = child_ids
        .iter()
        .filter_map(|c| entries.get(c).map(|n| n.size))
        .sum();
    if let Some(node) = entries.get_mut(&id) {
        node.size = total;
    }
}

fn recompute_link_count(entries: &mut HashMap<EntryId, EntryNode>, id: EntryId) {
    let subdirs = match entries.get(&id) {
        Some(n) if n.kind == EntryKind::Directory => n
            .children
            .values()
            .filter(|c| {
                entries
                    .get(c)
                    .map(|cn| cn.kind == EntryKind::Directory)
                    .unwrap_or(false)
            })
            .count(),
        _ => return,
    };
    if let Some(node) = entries.get_mut(&id) {
        node.link_count = 2 + subdirs as u32;
    }
}

fn propagate_size_upward(entries: &mut HashMap<EntryId, EntryNode>, start: EntryId) {
    let mut current = Some(start);
    while let Some(id) = current {
        let (size, parent) = match entries.get(&id) {
            Some(n) if n.kind == EntryKind::Directory => {
                let total: u64 = n
                    .children
                    .values()
                    .filter_map(|c| entries.get(c).map(|cn| cn.size))
                    .sum();
                (total, n.parent)
            }
            Some(n) => (n.size, n.parent),
            None => break,
        };
        if let Some(node) = entries.get_mut(&id) {
            node.size = size;
        }
        current = parent;
    }
}
