//! Indexnode configuration: TOML-backed, loaded via `fs2_core::config`
//! with the same sibling-rename-on-save idiom used everywhere else in
//! FS2.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Bounded worker pool size for concurrent share refreshes.
    pub refresh_workers: usize,
    /// Minimum interval between `/stats` regenerations, in milliseconds.
    pub stats_interval_ms: u64,
    /// Interval between peer liveness pings, in milliseconds.
    pub liveness_interval_ms: u64,
    /// Whether to broadcast this indexnode's presence over UDP.
    pub advertise: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            refresh_workers: 4,
            stats_interval_ms: 5_000,
            liveness_interval_ms: 30_000,
            advertise: true,
        }
    }
}

impl IndexConfig {
    pub fn default_path() -> Option<PathBuf> {
        fs2_core::config::state_dir("indexnode").map(|d| d.join("indexnode.toml"))
    }

    pub fn load(path: &std::path::Path) -> Self {
        fs2_core::config::load_toml(path)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), fs2_core::config::ConfigError> {
        fs2_core::config::save_toml_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = IndexConfig::default();
        assert!(cfg.refresh_workers > 0);
        assert!(cfg.advertise);
    }
}
