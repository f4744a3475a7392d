//! VirtualBox backend driven through the `VBoxManage` CLI

use crate::backend::{
    MachineHandle, Nic, StorageController, StorageMedium, VirtualizationBackend,
};
use crate::config::schema::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::machine::MachineState;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Markers VBoxManage prints when a machine id no longer resolves
const NOT_FOUND_MARKERS: &[&str] = &[
    "VBOX_E_OBJECT_NOT_FOUND",
    "Could not find a registered machine",
];

/// Thin async wrapper over the `VBoxManage` executable
#[derive(Debug, Clone)]
struct VBoxManage {
    program: String,
    timeout: Option<Duration>,
}

impl VBoxManage {
    /// Run `VBoxManage <args>` and return stdout on success
    async fn exec(&self, args: &[&str]) -> BackendResult<String> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Executing: {}", command);

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| BackendError::Timeout {
                    command: command.clone(),
                    timeout,
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| BackendError::spawn(command.clone(), e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(BackendError::command(command, stderr))
        }
    }
}

/// VirtualBox backend
pub struct VBoxManageBackend {
    vbox: VBoxManage,
}

impl VBoxManageBackend {
    /// Create a backend from config
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            vbox: VBoxManage {
                program: config.program.clone(),
                timeout: config.timeout(),
            },
        }
    }
}

#[async_trait]
impl VirtualizationBackend for VBoxManageBackend {
    async fn create_machine(&self, name: &str) -> BackendResult<()> {
        self.vbox
            .exec(&["createvm", "--name", name, "--register"])
            .await?;
        Ok(())
    }

    async fn list_machines(&self) -> BackendResult<Vec<Box<dyn MachineHandle>>> {
        let stdout = self.vbox.exec(&["list", "vms"]).await?;

        Ok(parse_machine_list(&stdout)
            .into_iter()
            .map(|(name, id)| {
                Box::new(VBoxHandle {
                    vbox: self.vbox.clone(),
                    id,
                    name,
                    state: MachineState::Missing,
                }) as Box<dyn MachineHandle>
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "VirtualBox"
    }
}

/// A machine registered with VirtualBox, addressed by UUID
#[derive(Debug)]
struct VBoxHandle {
    vbox: VBoxManage,
    id: String,
    name: String,
    state: MachineState,
}

impl VBoxHandle {
    async fn exec(&self, args: &[&str]) -> BackendResult<String> {
        self.vbox.exec(args).await.map_err(|e| match e {
            BackendError::Command { ref stderr, .. }
                if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) =>
            {
                BackendError::MachineNotFound(self.name.clone())
            }
            other => other,
        })
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

#[async_trait]
impl MachineHandle for VBoxHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn add_storage_controller(
        &self,
        name: &str,
        controller: &StorageController,
    ) -> BackendResult<()> {
        let ports = controller.ports.to_string();
        self.exec(&[
            "storagectl",
            &self.id,
            "--name",
            name,
            "--add",
            controller.bus.as_arg(),
            "--controller",
            controller.chipset.as_arg(),
            "--portcount",
            &ports,
            "--hostiocache",
            on_off(controller.host_io_cache),
            "--bootable",
            on_off(controller.bootable),
        ])
        .await?;
        Ok(())
    }

    async fn remove_storage_controller(&self, name: &str) -> BackendResult<()> {
        self.exec(&["storagectl", &self.id, "--name", name, "--remove"])
            .await?;
        Ok(())
    }

    async fn attach_storage(&self, controller: &str, medium: &StorageMedium) -> BackendResult<()> {
        let port = medium.port.to_string();
        let device = medium.device.to_string();
        let path = medium.medium.to_string_lossy();
        self.exec(&[
            "storageattach",
            &self.id,
            "--storagectl",
            controller,
            "--port",
            &port,
            "--device",
            &device,
            "--type",
            medium.drive_type.as_arg(),
            "--medium",
            &*path,
        ])
        .await?;
        Ok(())
    }

    async fn detach_storage(&self, controller: &str, port: u8, device: u8) -> BackendResult<()> {
        let port = port.to_string();
        let device = device.to_string();
        self.exec(&[
            "storageattach",
            &self.id,
            "--storagectl",
            controller,
            "--port",
            &port,
            "--device",
            &device,
            "--medium",
            "none",
        ])
        .await?;
        Ok(())
    }

    async fn set_nic(&self, slot: u8, nic: &Nic) -> BackendResult<()> {
        let nic_flag = format!("--nic{}", slot);
        let type_flag = format!("--nictype{}", slot);
        let adapter_flag = format!("--hostonlyadapter{}", slot);
        self.exec(&[
            "modifyvm",
            &self.id,
            &nic_flag,
            nic.mode.as_arg(),
            &type_flag,
            nic.hardware.as_arg(),
            &adapter_flag,
            &nic.network,
        ])
        .await?;
        Ok(())
    }

    async fn start(&self) -> BackendResult<()> {
        self.exec(&["startvm", &self.id, "--type", "headless"])
            .await?;
        Ok(())
    }

    async fn poweroff(&self) -> BackendResult<()> {
        self.exec(&["controlvm", &self.id, "poweroff"]).await?;
        Ok(())
    }

    async fn delete(&self) -> BackendResult<()> {
        self.exec(&["unregistervm", &self.id, "--delete"]).await?;
        Ok(())
    }

    async fn refresh(&mut self) -> BackendResult<()> {
        let stdout = self
            .exec(&["showvminfo", &self.id, "--machinereadable"])
            .await?;
        self.state = parse_vm_state(&stdout)?;
        Ok(())
    }

    fn state(&self) -> MachineState {
        self.state
    }
}

/// Parse `VBoxManage list vms` output into `(name, uuid)` pairs
///
/// Lines look like `"coreos" {0c1f4e4a-...}`. Names may contain spaces
/// and quotes, so the uuid is split off from the right.
pub fn parse_machine_list(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let split = line.rfind(" {")?;
            let name = line[..split].trim().strip_prefix('"')?.strip_suffix('"')?;
            let id = line[split + 2..].strip_suffix('}')?;
            Some((name.to_string(), id.to_string()))
        })
        .collect()
}

/// Extract the machine state from `showvminfo --machinereadable` output
pub fn parse_vm_state(stdout: &str) -> BackendResult<MachineState> {
    let raw = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("VMState="))
        .ok_or_else(|| BackendError::Parse("no VMState in showvminfo output".to_string()))?;
    let raw = raw.trim_matches('"');

    MachineState::from_backend(raw)
        .ok_or_else(|| BackendError::Parse(format!("unknown machine state '{}'", raw)))
}
