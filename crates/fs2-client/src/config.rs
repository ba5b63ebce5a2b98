//! Client configuration: shares to export, known indexnodes, and the
//! tunables for hashing/download rate limiting. TOML-backed via
//! `fs2_core::config`, same sibling-rename idiom as the rest of FS2.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareDef {
    pub name: String,
    pub root: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address this client's HTTP file server binds to.
    pub listen_addr: SocketAddr,
    /// Directories exported as shares.
    pub shares: Vec<ShareDef>,
    /// Indexnodes to register with.
    pub indexnodes: Vec<SocketAddr>,
    /// Bytes/sec cap for hashing I/O.
    pub hash_bandwidth_bytes_per_sec: u64,
    /// Bytes/sec cap for aggregate network download.
    pub download_bandwidth_bytes_per_sec: u64,
    /// Bytes/sec cap for outbound file serving.
    pub upload_bandwidth_bytes_per_sec: u64,
    /// Max concurrent chunk downloads per file.
    pub max_chunks_per_file: usize,
    /// Max concurrent download workers overall.
    pub max_download_workers: usize,
    /// Max concurrent upload slots served to any single peer.
    pub max_upload_slots_per_peer: usize,
    /// Fixed chunk size for Range-based downloads, in bytes.
    pub chunk_size_bytes: u64,
    /// Interval between share refresh sweeps, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Whether this client may elect itself an indexnode.
    pub auto_indexnode_enabled: bool,
    /// Fixed port used if this client elects itself active indexnode.
    pub auto_indexnode_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:49152".parse().unwrap(),
            shares: Vec::new(),
            indexnodes: Vec::new(),
            hash_bandwidth_bytes_per_sec: 20 * 1024 * 1024,
            download_bandwidth_bytes_per_sec: 10 * 1024 * 1024,
            upload_bandwidth_bytes_per_sec: 10 * 1024 * 1024,
            max_chunks_per_file: 4,
            max_download_workers: 8,
            max_upload_slots_per_peer: 3,
            chunk_size_bytes: 1024 * 1024,
            refresh_interval_ms: 60_000,
            auto_indexnode_enabled: false,
            auto_indexnode_port: 8080,
        }
    }
}

impl ClientConfig {
    pub fn default_path() -> Option<PathBuf> {
        fs2_core::config::state_dir("client").map(|d| d.join("client.toml"))
    }

    pub fn load(path: &Path) -> Self {
        fs2_core::config::load_toml(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), fs2_core::config::ConfigError> {
        fs2_core::config::save_toml_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = ClientConfig::default();
        assert!(cfg.max_chunks_per_file > 0);
        assert!(!cfg.auto_indexnode_enabled);
    }
}
