//! Compensating actions for partially provisioned machines

use crate::backend::MachineHandle;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Undo action for one completed provisioning step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteMachine,
    RemoveController { name: String },
    RemoveBackingFile { path: PathBuf },
    DetachDisk { controller: String, port: u8, device: u8 },
}

/// Stack of compensations, unwound newest first
#[derive(Debug, Default)]
pub struct Rollback {
    actions: Vec<Compensation>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drop all compensations once provisioning has succeeded
    pub fn disarm(&mut self) {
        self.actions.clear();
    }

    /// Run every compensation in reverse order
    ///
    /// Failures are logged and skipped so later compensations still run.
    /// Returns how many compensations failed.
    pub async fn unwind(&mut self, handle: &dyn MachineHandle) -> usize {
        let mut failed = 0;

        while let Some(action) = self.actions.pop() {
            debug!("Rolling back: {:?}", action);
            let result = match &action {
                Compensation::RemoveBackingFile { path } => tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| e.to_string()),
                Compensation::DeleteMachine => handle.delete().await.map_err(|e| e.to_string()),
                Compensation::RemoveController { name } => handle
                    .remove_storage_controller(name)
                    .await
                    .map_err(|e| e.to_string()),
                Compensation::DetachDisk {
                    controller,
                    port,
                    device,
                } => handle
                    .detach_storage(controller, *port, *device)
                    .await
                    .map_err(|e| e.to_string()),
            };

            if let Err(e) = result {
                warn!("Rollback step {:?} failed: {}", action, e);
                failed += 1;
            }
        }

        failed
    }
}
