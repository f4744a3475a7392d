//! Configuration schema for utah
//!
//! Configuration is stored at `~/.config/utah/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local content cache
    pub cache: CacheConfig,

    /// Image download settings
    pub download: DownloadConfig,

    /// Disk image conversion settings
    pub convert: ConvertConfig,

    /// Virtualization backend settings
    pub backend: BackendConfig,

    /// Machine layout and lifecycle settings
    pub machine: MachineConfig,
}

/// Content cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding downloads, converted images and backing files
    pub root: PathBuf,
}

impl CacheConfig {
    /// Directory holding per-machine backing files
    pub fn machines_dir(&self) -> PathBuf {
        self.root.join("machines")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/tmp/.utahcache"),
        }
    }
}

/// Image download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Overall timeout for a single download in seconds (0 = no timeout)
    pub timeout_secs: u64,
}

impl DownloadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        non_zero_secs(self.timeout_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { timeout_secs: 3600 }
    }
}

/// Disk image conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Conversion tool executable
    pub tool: String,

    /// Output format understood by the backend
    pub format: String,

    /// Conversion timeout in seconds (0 = no timeout)
    pub timeout_secs: u64,
}

impl ConvertConfig {
    pub fn timeout(&self) -> Option<Duration> {
        non_zero_secs(self.timeout_secs)
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            tool: "qemu-img".to_string(),
            format: "vdi".to_string(),
            timeout_secs: 1800,
        }
    }
}

/// Virtualization backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// VBoxManage executable
    pub program: String,

    /// Timeout for a single backend call in seconds (0 = no timeout)
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Option<Duration> {
        non_zero_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "VBoxManage".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Machine layout and lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Storage controller name
    pub controller: String,

    /// Host-only network the single NIC is bound to
    pub host_only_network: String,

    /// Undo completed provisioning steps when a later one fails
    pub rollback_on_failure: bool,

    /// How long to wait for a state change in seconds (0 waits forever)
    pub boot_timeout_secs: u64,

    /// Interval between state polls in milliseconds
    pub poll_interval_ms: u64,
}

impl MachineConfig {
    pub fn boot_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.boot_timeout_secs)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            controller: "defaultctlr".to_string(),
            host_only_network: "vboxnet0".to_string(),
            rollback_on_failure: true,
            boot_timeout_secs: 120,
            poll_interval_ms: 500,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
