//! Virtualization backend abstraction
//!
//! The provisioner and the machine state machine only talk to the backend
//! through these two capability traits. `VBoxManageBackend` drives a local
//! VirtualBox installation; tests use an in-memory stub.

#[cfg(test)]
pub(crate) mod stub;
mod vboxmanage;

pub use vboxmanage::{parse_machine_list, parse_vm_state, VBoxManageBackend};

use crate::config::Config;
use crate::error::BackendResult;
use crate::machine::MachineState;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Bus a storage controller is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBus {
    Sata,
}

impl StorageBus {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Sata => "sata",
        }
    }
}

/// Controller chipset emulated by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chipset {
    IntelAhci,
}

impl Chipset {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::IntelAhci => "IntelAhci",
        }
    }
}

/// Storage controller parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageController {
    pub bus: StorageBus,
    pub ports: u8,
    pub chipset: Chipset,
    pub host_io_cache: bool,
    pub bootable: bool,
}

impl StorageController {
    /// SATA controller matching VirtualBox's own defaults for new machines
    pub fn sata_ahci() -> Self {
        Self {
            bus: StorageBus::Sata,
            ports: 4,
            chipset: Chipset::IntelAhci,
            host_io_cache: true,
            bootable: true,
        }
    }
}

/// Kind of drive a medium is attached as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveType {
    Hdd,
}

impl DriveType {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Hdd => "hdd",
        }
    }
}

/// A medium attached to a controller slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMedium {
    pub port: u8,
    pub device: u8,
    pub drive_type: DriveType,
    pub medium: PathBuf,
}

/// NIC attachment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicMode {
    HostOnly,
}

impl NicMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::HostOnly => "hostonly",
        }
    }
}

/// Emulated NIC hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicHardware {
    Virtio,
}

impl NicHardware {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Virtio => "virtio",
        }
    }
}

/// Network adapter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nic {
    pub mode: NicMode,
    pub hardware: NicHardware,
    pub network: String,
}

impl Nic {
    /// Host-only virtio adapter bound to `network`
    pub fn host_only(network: impl Into<String>) -> Self {
        Self {
            mode: NicMode::HostOnly,
            hardware: NicHardware::Virtio,
            network: network.into(),
        }
    }
}

/// Machine registry of a virtualization backend
#[async_trait]
pub trait VirtualizationBackend: Send + Sync {
    /// Create and register an empty machine named `name`
    async fn create_machine(&self, name: &str) -> BackendResult<()>;

    /// List every registered machine
    async fn list_machines(&self) -> BackendResult<Vec<Box<dyn MachineHandle>>>;

    /// Get the human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Handle to a single machine registered with the backend
///
/// The state returned by `state()` is whatever the last `refresh()` read;
/// callers that need the current state refresh first.
#[async_trait]
pub trait MachineHandle: Send + Sync + fmt::Debug {
    /// Backend-assigned identifier
    fn id(&self) -> &str;

    /// Machine name as registered
    fn name(&self) -> &str;

    async fn add_storage_controller(
        &self,
        name: &str,
        controller: &StorageController,
    ) -> BackendResult<()>;

    async fn remove_storage_controller(&self, name: &str) -> BackendResult<()>;

    async fn attach_storage(&self, controller: &str, medium: &StorageMedium) -> BackendResult<()>;

    async fn detach_storage(&self, controller: &str, port: u8, device: u8) -> BackendResult<()>;

    async fn set_nic(&self, slot: u8, nic: &Nic) -> BackendResult<()>;

    async fn start(&self) -> BackendResult<()>;

    async fn poweroff(&self) -> BackendResult<()>;

    async fn delete(&self) -> BackendResult<()>;

    /// Re-read machine state from the backend
    async fn refresh(&mut self) -> BackendResult<()>;

    /// State as of the last refresh
    fn state(&self) -> MachineState;
}

/// Create the backend configured for this host
pub fn create_backend(config: &Config) -> Arc<dyn VirtualizationBackend> {
    Arc::new(VBoxManageBackend::new(&config.backend))
}
