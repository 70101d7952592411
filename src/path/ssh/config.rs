//! Per-host SSH configuration.
//!
//! Hosts are configured once in `~/.config/tfm/ssh_hosts.json`:
//!
//! ```json
//! { "dev-box": { "user": "deploy", "port": 22, "keyFile": "~/.ssh/id_ed25519" } }
//! ```
//!
//! The file is read once per process; hosts can also be registered
//! programmatically, which is how tests and embedding applications do it.

use crate::error::VfsError;
use crate::ignore_poison::IgnorePoison;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

fn default_port() -> u16 {
    22
}

/// Connection settings for one SSH host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshHostConfig {
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key file; `~` expands to the home directory.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Password authentication fallback when no key is configured.
    #[serde(default)]
    pub password: Option<String>,
}

static HOSTS: Mutex<Option<HashMap<String, SshHostConfig>>> = Mutex::new(None);

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tfm").join("ssh_hosts.json"))
}

fn load_from_disk() -> HashMap<String, SshHostConfig> {
    let Some(path) = config_file_path() else {
        return HashMap::new();
    };
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&contents) {
        Ok(hosts) => hosts,
        Err(e) => {
            log::warn!("failed to parse {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Looks up the configuration for a host, loading the config file on first use.
pub fn host_config(host: &str) -> Result<SshHostConfig, VfsError> {
    let mut hosts = HOSTS.lock_ignore_poison();
    let map = hosts.get_or_insert_with(load_from_disk);
    map.get(host).cloned().ok_or_else(|| VfsError::ConfigurationError {
        message: format!("no SSH configuration for host '{}'", host),
    })
}

/// Registers or replaces one host's configuration programmatically.
pub fn register_host(host: &str, config: SshHostConfig) {
    let mut hosts = HOSTS.lock_ignore_poison();
    hosts
        .get_or_insert_with(load_from_disk)
        .insert(host.to_string(), config);
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_key_path(path: &std::path::Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
