//! Machine provisioning
//!
//! Builds a bootable machine from a converted image: create, identify,
//! storage controller, private backing file, disk attachment, host-only NIC.
//! Each step gates the next. When a step fails, the steps already done are
//! undone in reverse order unless rollback is disabled in the config.

mod rollback;

pub use rollback::{Compensation, Rollback};

use crate::backend::{
    DriveType, MachineHandle, Nic, StorageController, StorageMedium, VirtualizationBackend,
};
use crate::config::schema::{CacheConfig, MachineConfig};
use crate::error::{BackendError, ProvisionStep, UtahError, UtahResult};
use crate::machine::Machine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Controller port the boot disk is attached to
pub const DISK_PORT: u8 = 1;
/// Controller device the boot disk is attached to
pub const DISK_DEVICE: u8 = 0;
/// NIC slot of the single host-only adapter
pub const NIC_SLOT: u8 = 1;

/// Creates and configures backend machines
pub struct MachineProvisioner {
    backend: Arc<dyn VirtualizationBackend>,
    machines_dir: PathBuf,
    controller: String,
    host_only_network: String,
    rollback_on_failure: bool,
}

impl MachineProvisioner {
    pub fn new(
        backend: Arc<dyn VirtualizationBackend>,
        cache: &CacheConfig,
        machine: &MachineConfig,
    ) -> Self {
        Self {
            backend,
            machines_dir: cache.machines_dir(),
            controller: machine.controller.clone(),
            host_only_network: machine.host_only_network.clone(),
            rollback_on_failure: machine.rollback_on_failure,
        }
    }

    /// Directory holding per-machine backing files
    pub fn machines_dir(&self) -> &Path {
        &self.machines_dir
    }

    /// Provision machine `name` with a private copy of `image` as its disk
    pub async fn create(&self, name: &str, image: &Path) -> UtahResult<Machine> {
        info!(
            "Provisioning machine {} on {} from {}",
            name,
            self.backend.backend_name(),
            image.display()
        );

        let step_error = |step: ProvisionStep, source: BackendError| UtahError::Provisioning {
            machine: name.to_string(),
            step,
            source,
        };

        self.backend
            .create_machine(name)
            .await
            .map_err(|e| step_error(ProvisionStep::CreateMachine, e))?;

        let handle = self.identify(name).await?;

        let mut rollback = Rollback::new();
        rollback.push(Compensation::DeleteMachine);

        let configured = self
            .configure(handle.as_ref(), name, image, &mut rollback)
            .await;

        match configured {
            Ok(backing_file) => {
                rollback.disarm();
                info!("Machine {} provisioned ({})", name, handle.id());
                Ok(Machine::new(
                    handle,
                    name.to_string(),
                    image.to_path_buf(),
                    backing_file,
                ))
            }
            Err(e) => {
                if self.rollback_on_failure {
                    warn!("Provisioning {} failed, rolling back {} step(s)", name, rollback.len());
                    let failed = rollback.unwind(handle.as_ref()).await;
                    if failed > 0 {
                        warn!("{} rollback step(s) failed for {}", failed, name);
                    }
                } else {
                    warn!(
                        "Provisioning {} failed, leaving partial machine {} in place",
                        name,
                        handle.id()
                    );
                }
                Err(e)
            }
        }
    }

    /// Find the machine just created by exact name
    async fn identify(&self, name: &str) -> UtahResult<Box<dyn MachineHandle>> {
        let mut matches: Vec<_> = self
            .backend
            .list_machines()
            .await
            .map_err(|e| UtahError::Provisioning {
                machine: name.to_string(),
                step: ProvisionStep::IdentifyMachine,
                source: e,
            })?
            .into_iter()
            .filter(|h| h.name() == name)
            .collect();

        if matches.len() != 1 {
            return Err(UtahError::MachineIdentity {
                name: name.to_string(),
                found: matches.len(),
            });
        }

        let handle = matches.remove(0);
        debug!("Identified machine {} as {}", name, handle.id());
        Ok(handle)
    }

    /// Steps after identification; every completed step registers its undo
    async fn configure(
        &self,
        handle: &dyn MachineHandle,
        name: &str,
        image: &Path,
        rollback: &mut Rollback,
    ) -> UtahResult<PathBuf> {
        let step_error = |step: ProvisionStep, source: BackendError| UtahError::Provisioning {
            machine: name.to_string(),
            step,
            source,
        };

        handle
            .add_storage_controller(&self.controller, &StorageController::sata_ahci())
            .await
            .map_err(|e| step_error(ProvisionStep::AddStorageController, e))?;
        rollback.push(Compensation::RemoveController {
            name: self.controller.clone(),
        });

        let backing_file = self.copy_backing_file(name, image).await?;
        rollback.push(Compensation::RemoveBackingFile {
            path: backing_file.clone(),
        });

        let medium = StorageMedium {
            port: DISK_PORT,
            device: DISK_DEVICE,
            drive_type: DriveType::Hdd,
            medium: backing_file.clone(),
        };
        handle
            .attach_storage(&self.controller, &medium)
            .await
            .map_err(|e| step_error(ProvisionStep::AttachStorage, e))?;
        rollback.push(Compensation::DetachDisk {
            controller: self.controller.clone(),
            port: DISK_PORT,
            device: DISK_DEVICE,
        });

        handle
            .set_nic(NIC_SLOT, &Nic::host_only(self.host_only_network.clone()))
            .await
            .map_err(|e| step_error(ProvisionStep::ConfigureNetwork, e))?;

        Ok(backing_file)
    }

    /// Copy `image` to a file only this machine will use
    async fn copy_backing_file(&self, name: &str, image: &Path) -> UtahResult<PathBuf> {
        let extension = image
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "img".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        let path = self
            .machines_dir
            .join(format!("{}-{}.{}", name, &suffix[..8], extension));

        tokio::fs::create_dir_all(&self.machines_dir)
            .await
            .map_err(|e| UtahError::BackingStore {
                path: self.machines_dir.clone(),
                source: e,
            })?;

        let bytes = match tokio::fs::copy(image, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // The copy may have created the file before failing
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    if remove.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial backing file {}: {}", path.display(), remove);
                    }
                }
                return Err(UtahError::BackingStore { path, source: e });
            }
        };

        debug!("Copied {} bytes into backing file {}", bytes, path.display());
        Ok(path)
    }
}
