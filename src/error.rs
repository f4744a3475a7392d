//! Error types for utah
//!
//! All modules use `UtahResult<T>` as their return type. Backend calls
//! fail with `BackendError`, which the provisioner and the machine wrap
//! with the step or operation that was being attempted.

use crate::machine::MachineState;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for utah operations
pub type UtahResult<T> = Result<T, UtahError>;

/// Result type alias for raw backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Provisioning step that a backend failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CreateMachine,
    IdentifyMachine,
    AddStorageController,
    AttachStorage,
    ConfigureNetwork,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateMachine => "create machine",
            Self::IdentifyMachine => "identify machine",
            Self::AddStorageController => "add storage controller",
            Self::AttachStorage => "attach storage",
            Self::ConfigureNetwork => "configure network",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle operation that a backend failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Start,
    Stop,
    Delete,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "poweroff",
            Self::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// Failure of a single call into the virtualization backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    #[error("Unexpected backend output: {0}")]
    Parse(String),
}

impl BackendError {
    /// Create a spawn error for a backend command
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Create a command error carrying the backend's diagnostic output
    pub fn command(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            stderr: stderr.into(),
        }
    }
}

/// All errors that can occur in utah
#[derive(Error, Debug)]
pub enum UtahError {
    // Download errors
    #[error("Download of {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("Download of {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    // Cache errors
    #[error("Cache IO error: {context}")]
    CacheIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache entry name {name:?}: {reason}")]
    InvalidEntryName { name: String, reason: String },

    // Conversion errors
    #[error("Image conversion failed: {stderr}")]
    Conversion { stderr: String },

    #[error("Failed to run {tool}: {source}")]
    ConversionIo {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image conversion timed out after {timeout:?}")]
    ConversionTimeout { timeout: Duration },

    // Provisioning errors
    #[error("Provisioning {machine} failed at step '{step}': {source}")]
    Provisioning {
        machine: String,
        step: ProvisionStep,
        #[source]
        source: BackendError,
    },

    #[error("Expected exactly one machine named {name}, found {found}")]
    MachineIdentity { name: String, found: usize },

    #[error("Failed to create backing store {path}: {source}")]
    BackingStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Lifecycle errors
    #[error("Failed to {op} machine {machine}: {source}")]
    Lifecycle {
        machine: String,
        op: LifecycleOp,
        #[source]
        source: BackendError,
    },

    #[error("Machine {machine} did not reach {expected} within {waited:?} (last state: {last})")]
    StateTimeout {
        machine: String,
        expected: MachineState,
        last: MachineState,
        waited: Duration,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UtahError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a cache filesystem error with context
    pub fn cache_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::CacheIo {
            context: context.into(),
            source,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::HttpStatus { status: 404, .. } => Some("Check the image URL"),
            Self::ConversionIo { .. } => {
                Some("Install qemu-img (qemu-utils on Debian/Ubuntu, qemu-img on Fedora)")
            }
            Self::Provisioning {
                source: BackendError::Spawn { .. },
                ..
            }
            | Self::Lifecycle {
                source: BackendError::Spawn { .. },
                ..
            } => Some("Install VirtualBox and make sure VBoxManage is on PATH"),
            Self::MachineIdentity { .. } => {
                Some("Remove duplicate machines with: VBoxManage unregistervm <uuid> --delete")
            }
            Self::ChecksumMismatch { .. } => Some("Run: utah cache clean, then retry the download"),
            Self::Interrupted => Some("A partial machine may remain; check with: VBoxManage list vms"),
            _ => None,
        }
    }
}
