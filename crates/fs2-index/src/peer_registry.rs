//! Peer registry and liveness state machine: a `DashMap<PeerIdentity,
//! Arc<Peer>>` with atomic liveness counters, plus alias-uniqueness and
//! fs-root-grafting bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fs2_core::types::PeerIdentity;
use fs2_core::{MAX_FAILED_LIVENESSES, RESERVED_LOOPBACK_ALIASES};
use parking_lot::RwLock;

use crate::fsindex::{EntryId, FilesystemIndex};

/// A registered peer. Identity equality is (ip, port); everything else
/// here may be refreshed in place across re-hellos.
pub struct Peer {
    pub identity: PeerIdentity,
    alias: RwLock<String>,
    secure: AtomicBool,
    cltoken: AtomicU64,
    avatar_hash: RwLock<Option<String>>,
    pub fs_root: EntryId,
    failed_liveness: AtomicU32,
    /// Enforces at most one outstanding ping per peer.
    ping_in_flight: AtomicBool,
}

impl Peer {
    pub fn alias(&self) -> String {
        self.alias.read().clone()
    }

    pub fn cltoken(&self) -> u64 {
        self.cltoken.load(Ordering::Relaxed)
    }

    pub fn secure(&self) -> bool {
        self.secure.load(Ordering::Relaxed)
    }

    pub fn avatar_hash(&self) -> Option<String> {
        self.avatar_hash.read().clone()
    }

    pub fn failed_liveness(&self) -> u32 {
        self.failed_liveness.load(Ordering::Relaxed)
    }

    /// Returns `true` if a ping was not already outstanding (caller may
    /// proceed); `false` means the tick should be skipped and a warning
    /// logged.
    pub fn try_begin_ping(&self) -> bool {
        self.ping_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_ping(&self) {
        self.ping_in_flight.store(false, Ordering::Release);
    }
}

/// Outcome of a `/hello` registration attempt.
pub struct Registration {
    pub peer: Arc<Peer>,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `fs2-port` outside [`fs2_core::PORT_MIN`, `fs2_core::PORT_MAX`].
    PortOutOfRange,
}

/// The indexnode's peer map, alias uniqueness set, and liveness
/// bookkeeping. Alias uniqueness is resolved case-insensitively, in
/// contrast to share-name lookup under a peer, which stays
/// case-sensitive like general path lookup.
pub struct PeerRegistry {
    peers: DashMap<PeerIdentity, Arc<Peer>>,
    /// Lowercased alias -> owning identity.
    aliases: DashMap<String, PeerIdentity>,
    fsindex: Arc<FilesystemIndex>,
}

impl PeerRegistry {
    pub fn new(fsindex: Arc<FilesystemIndex>) -> Self {
        Self {
            peers: DashMap::new(),
            aliases: DashMap::new(),
            fsindex,
        }
    }

    pub fn get(&self, identity: &PeerIdentity) -> Option<Arc<Peer>> {
        self.peers.get(identity).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn snapshot_identities(&self) -> Vec<PeerIdentity> {
        self.peers.iter().map(|e| *e.key()).collect()
    }

    /// Register a new peer or refresh an existing one's token/secure/alias
    /// in place. Reachability must already have been verified by the
    /// caller (an immediate ping) before calling this — this function
    /// does no I/O.
    pub fn register_or_refresh(
        &self,
        identity: PeerIdentity,
        cltoken: u64,
        secure: bool,
        proposed_alias: Option<&str>,
    ) -> Registration {
        if let Some(existing) = self.peers.get(&identity) {
            let peer = existing.clone();
            peer.cltoken.store(cltoken, Ordering::Relaxed);
            peer.secure.store(secure, Ordering::Relaxed);
            if let Some(alias) = proposed_alias {
                self.set_alias(&peer, alias);
            }
            return Registration {
                peer,
                is_new: false,
            };
        }

        let default_alias = proposed_alias
            .map(str::to_string)
            .unwrap_or_else(|| identity.to_string());
        let fs_root = self.fsindex.register_client(&default_alias);

        let peer = Arc::new(Peer {
            identity,
            alias: RwLock::new(default_alias.clone()),
            secure: AtomicBool::new(secure),
            cltoken: AtomicU64::new(cltoken),
            avatar_hash: RwLock::new(None),
            fs_root,
            failed_liveness: AtomicU32::new(0),
            ping_in_flight: AtomicBool::new(false),
        });

        self.resolve_alias_collision(&peer, &default_alias);
        self.peers.insert(identity, peer.clone());

        Registration {
            peer,
            is_new: true,
        }
    }

    /// Resolve the `fs2-alias` header for `peer` to `proposed`: no-op if
    /// unchanged; suffix with the peer's address if it collides with
    /// another peer or is reserved for loopback-only peers and this peer
    /// is not loopback.
    pub fn set_alias(&self, peer: &Peer, proposed: &str) {
        if peer.alias() == proposed {
            return;
        }
        self.resolve_alias_collision(peer, proposed);
    }

    fn resolve_alias_collision(&self, peer: &Peer, proposed: &str) {
        let key = proposed.to_ascii_lowercase();
        let reserved = RESERVED_LOOPBACK_ALIASES.contains(&key.as_str());

        let collides = self
            .aliases
            .get(&key)
            .map(|owner| *owner != peer.identity)
            .unwrap_or(false);

        let resolved = if (reserved && !peer.identity.is_loopback()) || collides {
            format!("{proposed}-{}", peer.identity)
        } else {
            proposed.to_string()
        };

        let old_alias = peer.alias();
        let old_key = old_alias.to_ascii_lowercase();
        if old_key != resolved.to_ascii_lowercase() {
            self.aliases.remove(&old_key);
        }
        self.aliases
            .insert(resolved.to_ascii_lowercase(), peer.identity);

        if old_alias != resolved {
            self.fsindex.rename(peer.fs_root, &resolved);
            *peer.alias.write() = resolved;
        }
    }

    /// Record the result of a liveness ping. Returns `true` if the peer
    /// was evicted as a result (failed count exceeded
    /// [`MAX_FAILED_LIVENESSES`]).
    pub fn record_ping_result(&self, identity: &PeerIdentity, ok: bool) -> bool {
        let peer = match self.peers.get(identity) {
            Some(p) => p.clone(),
            None => return false,
        };

        if ok {
            peer.failed_liveness.store(0, Ordering::Relaxed);
            false
        } else {
            let failed = peer.failed_liveness.fetch_add(1, Ordering::Relaxed) + 1;
            if failed > MAX_FAILED_LIVENESSES {
                self.evict(identity);
                true
            } else {
                false
            }
        }
    }

    /// Cancel the peer's liveness tracking, remove it from the address and
    /// alias maps, and erase its fs-root subtree. Share delisting happens
    /// at a higher layer (the share importer owns share lifecycle);
    /// erasing the fs-root here removes all of the peer's entries from
    /// both secondary indices regardless.
    pub fn evict(&self, identity: &PeerIdentity) {
        if let Some((_, peer)) = self.peers.remove(identity) {
            let key = peer.alias().to_ascii_lowercase();
            self.aliases.remove(&key);
            self.fsindex.deregister_client(peer.fs_root);
        }
    }
}
