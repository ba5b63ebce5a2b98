//! Core types, wire protocol, content digest, and file-list codec for FS2.
//!
//! This crate is shared by `fs2-index` (the indexnode) and `fs2-client`
//! (the client). It carries no networking and no filesystem I/O of its
//! own beyond what the digest and file-list codec need — everything here
//! is pure data modeling so both roles agree on the wire.

pub mod config;
pub mod error;
pub mod filelist;
pub mod hash;
pub mod keyword;
pub mod protocol;
pub mod transport;
pub mod types;

pub use error::Fs2Error;
pub use hash::{Digest, FILE_DIGEST_BITS, FILE_DIGEST_BYTES};
pub use types::{EntryKind, PeerIdentity, ShareKind};

/// Protocol version advertised in the `fs2-version` header and UDP adverts.
pub const PROTOCOL_VERSION: &str = "fs2/2";

/// Minimum permitted client port in `fs2-port` / hello registration.
pub const PORT_MIN: u16 = 1024;

/// Maximum permitted client port in `fs2-port` / hello registration.
pub const PORT_MAX: u16 = 65535;

/// Consecutive failed liveness pings before a peer is evicted.
pub const MAX_FAILED_LIVENESSES: u32 = 3;

/// Fixed UDP port used for indexnode advertisement broadcasts.
pub const ADVERTISEMENT_DATAGRAM_PORT: u16 = 21782;

/// Interval between indexnode advertisement broadcasts.
pub const INDEXNODE_ADVERTISE_INTERVAL_MS: u64 = 4_000;

/// Number of missed advertise intervals before a seen advert entry expires.
pub const ADVERTISE_EXPIRY_INTERVALS: u32 = 5;

/// Maximum results returned by a single search request.
pub const MAX_SEARCH_RESULTS: usize = 500;

/// Aliases reserved for loopback ("local-only") peers; any other peer that
/// claims one is suffixed with its address instead.
pub const RESERVED_LOOPBACK_ALIASES: &[&str] = &["local", "localhost", "loopback"];
