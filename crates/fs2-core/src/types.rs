//! Core type definitions shared by both FS2 roles: plain serde structs
//! with small helper methods.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Kind of filesystem entry in the indexnode's aggregated tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// Kind of share manifest a peer advertises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareKind {
    Xml,
    FileList,
}

/// Identity of a registered peer: (ip, port, client-token). Identity
/// equality is (ip, port) only — the token can change across a re-hello
/// without creating a new peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerIdentity {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Opaque per-peer token sent in the `fs2-cltoken` header. The indexnode
/// does not interpret it; it is refreshed in place on re-hello.
pub type ClientToken = u64;

/// Integer tag grouping a batch of queued downloads so that "no sources
/// available" can be decided once for the whole batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchId(pub u64);

/// Per-run random identifier used by auto-indexnode election.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdvertUid(pub u64);

impl AdvertUid {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        getrandom::getrandom(&mut bytes).expect("system RNG unavailable");
        AdvertUid(u64::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for AdvertUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Self-reported suitability score for auto-indexnode election. Larger is
/// better.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability(pub u64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn identity_equality_ignores_token() {
        let a = PeerIdentity::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 49152);
        let b = PeerIdentity::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 49152);
        assert_eq!(a, b);
    }

    #[test]
    fn advert_uid_is_random() {
        assert_ne!(AdvertUid::generate(), AdvertUid::generate());
    }

    #[test]
    fn loopback_detection() {
        let lo = PeerIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        assert!(lo.is_loopback());
    }
}
