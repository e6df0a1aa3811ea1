//! Node configuration with documented defaults and JSON persistence.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::DISCOVERY_PORT;
use crate::pool::POOL_SIZE;

const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "swift";
const APP_NAME: &str = "swift";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Advisory starting point for port scans; actual pool ports are
    /// OS-assigned.
    pub base_port: u16,
    /// Number of pre-opened chunk listeners.
    pub pool_size: usize,
    /// Bounds both the sender's accept wait and the receiver's discovery
    /// listen.
    pub discovery_timeout_secs: u64,
    /// Well-known UDP port beacons are exchanged on.
    pub discovery_port: u16,
    /// Where beacons are sent. Tests point this at loopback.
    pub broadcast_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            base_port: 4009,
            pool_size: POOL_SIZE,
            discovery_timeout_secs: 20,
            discovery_port: DISCOVERY_PORT,
            broadcast_addr: "255.255.255.255".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("SWIFT_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from disk or return defaults.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk. Best effort, like the rest of the config layer.
    pub fn save(&self) {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return,
        };

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = fs::write(path, json);
        }
    }
}
