//! Machine lifecycle
//!
//! A `Machine` wraps exactly one backend handle and drives it through
//! start → poweroff → delete. State is never cached here: every query
//! goes back to the backend.

use crate::backend::MachineHandle;
use crate::config::schema::MachineConfig;
use crate::error::{BackendError, LifecycleOp, UtahError, UtahResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Poweroff,
    Running,
    Paused,
    Saved,
    Aborted,
    /// Backend is between two of the states above (starting, saving, ...)
    Transitioning,
    /// Backend does not know the machine, or could not be asked
    Missing,
}

impl MachineState {
    /// Parse the state string VirtualBox reports
    pub fn from_backend(s: &str) -> Option<Self> {
        match s {
            "poweroff" | "powered off" => Some(Self::Poweroff),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "saved" => Some(Self::Saved),
            "aborted" | "gurumeditation" => Some(Self::Aborted),
            "starting" | "stopping" | "saving" | "restoring" | "snapshotting"
            | "livesnapshotting" | "deletingsnapshot" | "deletingsnapshotlive"
            | "teleporting" | "teleportingin" | "settingup" => Some(Self::Transitioning),
            _ => None,
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Poweroff => "poweroff",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Saved => "saved",
            Self::Aborted => "aborted",
            Self::Transitioning => "transitioning",
            Self::Missing => "missing",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of asking the backend for a machine's state
#[derive(Debug)]
pub enum StateQuery {
    /// The backend answered; `Missing` means it does not know the machine
    Known(MachineState),
    /// The backend could not be queried
    QueryFailed(BackendError),
}

impl StateQuery {
    /// Collapse a failed query into `Missing`
    pub fn or_missing(self) -> MachineState {
        match self {
            Self::Known(state) => state,
            Self::QueryFailed(_) => MachineState::Missing,
        }
    }
}

/// Bounded polling used when waiting for a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    /// `None` polls until the state is reached
    pub timeout: Option<Duration>,
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }
}

impl From<&MachineConfig> for WaitPolicy {
    fn from(config: &MachineConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            timeout: config.boot_timeout(),
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from(&MachineConfig::default())
    }
}

/// A provisioned machine
#[derive(Debug)]
pub struct Machine {
    handle: Box<dyn MachineHandle>,
    name: String,
    image: PathBuf,
    backing_file: PathBuf,
}

impl Machine {
    pub(crate) fn new(
        handle: Box<dyn MachineHandle>,
        name: String,
        image: PathBuf,
        backing_file: PathBuf,
    ) -> Self {
        Self {
            handle,
            name,
            image,
            backing_file,
        }
    }

    /// Requested machine name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend-assigned identifier
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Converted image the backing file was copied from
    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Private disk file attached to this machine
    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    fn lifecycle_error(&self, op: LifecycleOp, source: BackendError) -> UtahError {
        UtahError::Lifecycle {
            machine: self.name.clone(),
            op,
            source,
        }
    }

    /// Boot the machine
    ///
    /// Refreshes first so a stale handle is reported before the backend is
    /// asked to change anything.
    pub async fn start(&mut self) -> UtahResult<()> {
        info!("Starting machine {}", self.name);

        if let Err(e) = self.handle.refresh().await {
            return Err(self.lifecycle_error(LifecycleOp::Start, e));
        }
        debug!("Machine {} is {} before start", self.name, self.handle.state());

        self.handle
            .start()
            .await
            .map_err(|e| self.lifecycle_error(LifecycleOp::Start, e))
    }

    /// Power the machine off. The backend decides whether that is legal.
    pub async fn stop(&mut self) -> UtahResult<()> {
        info!("Powering off machine {}", self.name);

        self.handle
            .poweroff()
            .await
            .map_err(|e| self.lifecycle_error(LifecycleOp::Stop, e))
    }

    /// Unregister the machine and delete its disks
    pub async fn delete(&mut self) -> UtahResult<()> {
        info!("Deleting machine {}", self.name);

        self.handle
            .delete()
            .await
            .map_err(|e| self.lifecycle_error(LifecycleOp::Delete, e))?;

        // The backend normally deletes attached media itself
        match tokio::fs::remove_file(&self.backing_file).await {
            Ok(()) => debug!("Removed backing file {}", self.backing_file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove backing file {}: {}",
                self.backing_file.display(),
                e
            ),
        }

        Ok(())
    }

    /// Ask the backend for the current state
    pub async fn query_state(&mut self) -> StateQuery {
        match self.handle.refresh().await {
            Ok(()) => StateQuery::Known(self.handle.state()),
            Err(BackendError::MachineNotFound(_)) => StateQuery::Known(MachineState::Missing),
            Err(e) => StateQuery::QueryFailed(e),
        }
    }

    /// Current state, treating a failed query as `Missing`
    pub async fn state(&mut self) -> MachineState {
        match self.query_state().await {
            StateQuery::QueryFailed(e) => {
                warn!("State query for {} failed, reporting missing: {}", self.name, e);
                MachineState::Missing
            }
            known => known.or_missing(),
        }
    }

    /// Poll until the machine reaches `expected` or the policy's deadline passes
    ///
    /// Failed queries are retried until the deadline.
    pub async fn wait_for_state(
        &mut self,
        expected: MachineState,
        policy: WaitPolicy,
    ) -> UtahResult<()> {
        let started = Instant::now();
        let deadline = policy.timeout.map(|timeout| started + timeout);

        loop {
            let last = match self.query_state().await {
                StateQuery::Known(state) if state == expected => {
                    debug!(
                        "Machine {} reached {} after {:?}",
                        self.name,
                        expected,
                        started.elapsed()
                    );
                    return Ok(());
                }
                StateQuery::Known(state) => state,
                StateQuery::QueryFailed(e) => {
                    debug!("State query for {} failed, retrying: {}", self.name, e);
                    MachineState::Missing
                }
            };

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(UtahError::StateTimeout {
                        machine: self.name.clone(),
                        expected,
                        last,
                        waited: now - started,
                    });
                }
                Some(deadline) => policy.interval.min(deadline - now),
                None => policy.interval,
            };

            tokio::time::sleep(pause).await;
        }
    }
}
