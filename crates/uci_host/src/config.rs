//! Host settings, read from a TOML file.
//!
//! ```toml
//! data_dir = "/home/me/.local/share/uci-host"
//! uci_timeout_ms = 5000
//! ready_timeout_ms = 2000
//! stop_grace_ms = 300
//! default_movetime_ms = 200
//! bestmove_timeout_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::HandshakeTimeouts;

/// Directory name used under the per-user data directory.
pub const APP_DIR_NAME: &str = "uci-host";

const STORE_FILE_NAME: &str = "engines.ini";
const ENGINES_DIR_NAME: &str = "engines";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root for the registry store and installed engines
    pub data_dir: Option<PathBuf>,
    pub uci_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub stop_grace_ms: u64,
    /// Search limit used when a configuration names none
    pub default_movetime_ms: u64,
    /// How long to wait for `bestmove` after sending `stop` (unset = forever)
    pub bestmove_timeout_ms: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            uci_timeout_ms: 5000,
            ready_timeout_ms: 2000,
            stop_grace_ms: 300,
            default_movetime_ms: 200,
            bestmove_timeout_ms: None,
        }
    }
}

impl HostConfig {
    /// Load from `path`. A missing file means all defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// The registry's backing file.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join(STORE_FILE_NAME)
    }

    /// Where installed engines are copied, one folder per engine id.
    pub fn engines_dir(&self) -> PathBuf {
        self.data_dir().join(ENGINES_DIR_NAME)
    }

    pub fn handshake_timeouts(&self) -> HandshakeTimeouts {
        HandshakeTimeouts {
            uci: Duration::from_millis(self.uci_timeout_ms),
            ready: Duration::from_millis(self.ready_timeout_ms),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn bestmove_timeout(&self) -> Option<Duration> {
        self.bestmove_timeout_ms.map(Duration::from_millis)
    }
}

/// Per-user application data directory for this host.
pub fn default_data_dir() -> PathBuf {
    user_data_root()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(windows)]
fn user_data_root() -> Option<PathBuf> {
    std::env::var_os("APPDATA")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(not(windows))]
fn user_data_root() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg));
    }
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}
