//! In-memory backend for tests
//!
//! Records every call and keeps a tiny machine registry so tests can assert
//! on what the provisioner and the state machine did. Individual operations
//! can be told to fail.

use crate::backend::{
    MachineHandle, Nic, StorageController, StorageMedium, VirtualizationBackend,
};
use crate::error::{BackendError, BackendResult};
use crate::machine::MachineState;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    List,
    AddController,
    RemoveController,
    Attach,
    Detach,
    SetNic,
    Start,
    Poweroff,
    Delete,
    Refresh,
}

#[derive(Debug, Clone)]
pub struct StubMachine {
    pub id: String,
    pub name: String,
    pub state: MachineState,
    pub controllers: Vec<(String, StorageController)>,
    pub disks: Vec<(String, StorageMedium)>,
    pub nics: BTreeMap<u8, Nic>,
}

#[derive(Debug, Default)]
struct Registry {
    machines: Vec<StubMachine>,
    failing: HashSet<Op>,
    calls: Vec<Op>,
    next_id: u32,
}

impl Registry {
    fn check(&mut self, op: Op) -> BackendResult<()> {
        self.calls.push(op);
        if self.failing.contains(&op) {
            return Err(BackendError::command(
                format!("stub {:?}", op),
                format!("injected {:?} failure", op),
            ));
        }
        Ok(())
    }

    fn machine_mut(&mut self, id: &str) -> BackendResult<&mut StubMachine> {
        self.machines
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| BackendError::MachineNotFound(id.to_string()))
    }
}

/// Stub backend whose clones share one registry
#[derive(Debug, Clone, Default)]
pub struct StubBackend {
    registry: Arc<Mutex<Registry>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail
    pub fn fail(&self, op: Op) {
        self.registry.lock().unwrap().failing.insert(op);
    }

    /// Let `op` succeed again
    pub fn heal(&self, op: Op) {
        self.registry.lock().unwrap().failing.remove(&op);
    }

    pub fn machines(&self) -> Vec<StubMachine> {
        self.registry.lock().unwrap().machines.clone()
    }

    pub fn calls(&self) -> Vec<Op> {
        self.registry.lock().unwrap().calls.clone()
    }

    /// Register a machine directly, bypassing `create_machine`
    pub fn insert(&self, name: &str) {
        let mut reg = self.registry.lock().unwrap();
        reg.next_id += 1;
        let id = format!("stub-{}", reg.next_id);
        reg.machines.push(StubMachine {
            id,
            name: name.to_string(),
            state: MachineState::Poweroff,
            controllers: vec![],
            disks: vec![],
            nics: BTreeMap::new(),
        });
    }

    /// Force a machine into a state
    pub fn set_state(&self, name: &str, state: MachineState) {
        let mut reg = self.registry.lock().unwrap();
        if let Some(m) = reg.machines.iter_mut().find(|m| m.name == name) {
            m.state = state;
        }
    }
}

#[async_trait]
impl VirtualizationBackend for StubBackend {
    async fn create_machine(&self, name: &str) -> BackendResult<()> {
        self.registry.lock().unwrap().check(Op::Create)?;
        self.insert(name);
        Ok(())
    }

    async fn list_machines(&self) -> BackendResult<Vec<Box<dyn MachineHandle>>> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::List)?;
        Ok(reg
            .machines
            .iter()
            .map(|m| {
                Box::new(StubHandle {
                    registry: Arc::clone(&self.registry),
                    id: m.id.clone(),
                    name: m.name.clone(),
                    state: MachineState::Missing,
                }) as Box<dyn MachineHandle>
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "stub"
    }
}

#[derive(Debug)]
pub struct StubHandle {
    registry: Arc<Mutex<Registry>>,
    id: String,
    name: String,
    state: MachineState,
}

#[async_trait]
impl MachineHandle for StubHandle {
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
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::AddController)?;
        reg.machine_mut(&self.id)?
            .controllers
            .push((name.to_string(), controller.clone()));
        Ok(())
    }

    async fn remove_storage_controller(&self, name: &str) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::RemoveController)?;
        reg.machine_mut(&self.id)?.controllers.retain(|(n, _)| n != name);
        Ok(())
    }

    async fn attach_storage(&self, controller: &str, medium: &StorageMedium) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::Attach)?;
        reg.machine_mut(&self.id)?
            .disks
            .push((controller.to_string(), medium.clone()));
        Ok(())
    }

    async fn detach_storage(&self, controller: &str, port: u8, device: u8) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::Detach)?;
        reg.machine_mut(&self.id)?
            .disks
            .retain(|(c, d)| !(c == controller && d.port == port && d.device == device));
        Ok(())
    }

    async fn set_nic(&self, slot: u8, nic: &Nic) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::SetNic)?;
        reg.machine_mut(&self.id)?.nics.insert(slot, nic.clone());
        Ok(())
    }

    async fn start(&self) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::Start)?;
        let machine = reg.machine_mut(&self.id)?;
        match machine.state {
            MachineState::Poweroff | MachineState::Saved | MachineState::Aborted => {
                machine.state = MachineState::Running;
                Ok(())
            }
            other => Err(BackendError::command(
                "stub startvm",
                format!("machine is {}", other),
            )),
        }
    }

    async fn poweroff(&self) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::Poweroff)?;
        reg.machine_mut(&self.id)?.state = MachineState::Poweroff;
        Ok(())
    }

    async fn delete(&self) -> BackendResult<()> {
        let mut reg = self.registry.lock().unwrap();
        reg.check(Op::Delete)?;
        let before = reg.machines.len();
        reg.machines.retain(|m| m.id != self.id);
        if reg.machines.len() == before {
            return Err(BackendError::MachineNotFound(self.name.clone()));
        }
        Ok(())
    }

    async fn refresh(&mut self) -> BackendResult<()> {
        let state = {
            let mut reg = self.registry.lock().unwrap();
            reg.check(Op::Refresh)?;
            reg.machine_mut(&self.id)?.state
        };
        self.state = state;
        Ok(())
    }

    fn state(&self) -> MachineState {
        self.state
    }
}
