//! Shared configuration plumbing: TOML load/save and the sibling-rename
//! atomic-write idiom used throughout FS2 for persisted state (config,
//! file lists, peer stats, download queue).

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

/// Errors from loading or saving persisted TOML state.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "parse error: {e}"),
            ConfigError::Serialize(e) => write!(f, "serialize error: {e}"),
            ConfigError::NoConfigDir => write!(f, "no configuration directory available"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Resolve the per-role config/state directory, e.g.
/// `~/.config/fs2/indexnode` on Linux for `app_qualifier = "indexnode"`.
pub fn state_dir(role: &str) -> Option<PathBuf> {
    ProjectDirs::from("net", "fs2", "fs2")
        .map(|dirs| dirs.config_dir().join(role))
}

/// Load a TOML-backed config of type `T`, falling back to `T::default()`
/// if the file is absent or malformed (logged, never fatal).
pub fn load_toml<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        debug!("config file {:?} not found, using defaults", path);
        return T::default();
    }
    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(parsed) => {
                info!("loaded config from {:?}", path);
                parsed
            }
            Err(e) => {
                warn!("failed to parse config {:?}: {e}, using defaults", path);
                T::default()
            }
        },
        Err(e) => {
            warn!("failed to read config {:?}: {e}, using defaults", path);
            T::default()
        }
    }
}

/// Write `value` to `path` using the sibling-rename idiom: serialize to
/// `path.working`, then rename over `path`. An interrupted write never
/// corrupts the previously committed file.
pub fn save_toml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(value).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    write_atomic(path, content.as_bytes()).map_err(|e| ConfigError::Io(e.to_string()))
}

/// Write arbitrary bytes to `path` via a `.working` sibling + rename, the
/// same atomic-write idiom used for file lists, peer stats, and the
/// download queue.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let working = sibling_working_path(path);
    fs::write(&working, bytes)?;
    fs::rename(&working, path)?;
    Ok(())
}

fn sibling_working_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".working");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Sample {
        port: u16,
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cfg: Sample = load_toml(&path);
        assert_eq!(cfg, Sample::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        let cfg = Sample { port: 4242 };
        save_toml_atomic(&path, &cfg).unwrap();
        assert!(path.exists());
        assert!(!sibling_working_path(&path).exists());

        let loaded: Sample = load_toml(&path);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn write_atomic_leaves_no_working_file_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(!sibling_working_path(&path).exists());
    }
}
