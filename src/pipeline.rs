//! End-to-end provisioning pipeline
//!
//! Sequences cache → convert → provision → boot → poweroff → delete. Each
//! stage only runs once the previous one succeeded.

use crate::backend::{create_backend, VirtualizationBackend};
use crate::cache::{CacheStore, HttpFetcher};
use crate::config::Config;
use crate::convert::ImageConverter;
use crate::error::{UtahError, UtahResult};
use crate::machine::{Machine, MachineState, WaitPolicy};
use crate::provision::MachineProvisioner;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pipeline stage, reported as it begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Convert,
    Provision,
    Boot,
    Hold,
    PowerOff,
    Delete,
}

impl Stage {
    /// Every stage of a full run, in order
    pub const ALL: [Stage; 7] = [
        Stage::Fetch,
        Stage::Convert,
        Stage::Provision,
        Stage::Boot,
        Stage::Hold,
        Stage::PowerOff,
        Stage::Delete,
    ];

    /// 1-based position within a full run
    pub fn position(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).map_or(0, |i| i + 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fetch => "Fetching image",
            Self::Convert => "Converting image",
            Self::Provision => "Provisioning machine",
            Self::Boot => "Booting machine",
            Self::Hold => "Holding machine",
            Self::PowerOff => "Powering off machine",
            Self::Delete => "Deleting machine",
        };
        write!(f, "{}", label)
    }
}

/// What to build and boot
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub url: String,
    /// Cache entry name for the download
    pub image_name: String,
    /// Cache entry name for the converted image; derived when absent
    pub converted_name: Option<String>,
    pub machine_name: String,
    pub expected_sha256: Option<String>,
    /// How long to keep the machine running before powering it off
    pub hold: Duration,
}

impl PipelineRequest {
    /// Request whose cache entry name is taken from the URL's last segment
    pub fn new(url: impl Into<String>, machine_name: impl Into<String>) -> UtahResult<Self> {
        let url = url.into();
        let image_name = entry_name_from_url(&url)?;
        Ok(Self {
            url,
            image_name,
            converted_name: None,
            machine_name: machine_name.into(),
            expected_sha256: None,
            hold: Duration::ZERO,
        })
    }

    /// Cache entry name of the converted image for `format`
    pub fn converted_name_for(&self, format: &str) -> String {
        match &self.converted_name {
            Some(name) => name.clone(),
            None => converted_entry_name(&self.image_name, format),
        }
    }
}

/// Outcome of a full run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub machine_name: String,
    pub machine_id: String,
    pub image: PathBuf,
    pub converted: PathBuf,
    pub final_state: MachineState,
    pub elapsed: Duration,
}

/// Cache, converter and provisioner wired together
pub struct Pipeline {
    cache: CacheStore,
    converter: ImageConverter,
    provisioner: MachineProvisioner,
    wait: WaitPolicy,
}

impl Pipeline {
    pub fn new(
        cache: CacheStore,
        converter: ImageConverter,
        provisioner: MachineProvisioner,
        wait: WaitPolicy,
    ) -> Self {
        Self {
            cache,
            converter,
            provisioner,
            wait,
        }
    }

    /// Pipeline using HTTP downloads and the configured backend
    pub fn from_config(config: &Config) -> Self {
        Self::with_backend(config, create_backend(config))
    }

    /// Pipeline using HTTP downloads and `backend`
    pub fn with_backend(config: &Config, backend: Arc<dyn VirtualizationBackend>) -> Self {
        let fetcher = Arc::new(HttpFetcher::new(&config.download));
        Self::new(
            CacheStore::new(&config.cache, fetcher),
            ImageConverter::new(&config.convert),
            MachineProvisioner::new(backend, &config.cache, &config.machine),
            WaitPolicy::from(&config.machine),
        )
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Fetch and convert; returns the cached download and converted image
    pub async fn prepare(
        &self,
        req: &PipelineRequest,
        on_stage: &(dyn Fn(Stage) + Send + Sync),
    ) -> UtahResult<(PathBuf, PathBuf)> {
        on_stage(Stage::Fetch);
        let image = self
            .cache
            .fetch_verified(&req.url, &req.image_name, req.expected_sha256.as_deref())
            .await?;

        on_stage(Stage::Convert);
        let converted = self
            .cache
            .entry_path(&req.converted_name_for(self.converter.format()))?;
        self.converter.convert(&image, &converted).await?;

        Ok((image, converted))
    }

    /// Fetch, convert and provision, leaving the machine powered off
    pub async fn provision(
        &self,
        req: &PipelineRequest,
        on_stage: &(dyn Fn(Stage) + Send + Sync),
    ) -> UtahResult<Machine> {
        let (_, converted) = self.prepare(req, on_stage).await?;

        on_stage(Stage::Provision);
        self.provisioner.create(&req.machine_name, &converted).await
    }

    /// Full run: provision, boot, hold, power off and delete
    ///
    /// When anything after provisioning fails the machine is torn down
    /// before the error is returned.
    pub async fn run(
        &self,
        req: &PipelineRequest,
        on_stage: &(dyn Fn(Stage) + Send + Sync),
    ) -> UtahResult<PipelineReport> {
        let started = Instant::now();
        let (image, converted) = self.prepare(req, on_stage).await?;

        on_stage(Stage::Provision);
        let mut machine = self.provisioner.create(&req.machine_name, &converted).await?;
        let machine_id = machine.id().to_string();

        if let Err(e) = self.cycle(&mut machine, req.hold, on_stage).await {
            teardown(&mut machine).await;
            return Err(e);
        }

        on_stage(Stage::Delete);
        machine.delete().await?;
        let final_state = machine.state().await;

        info!(
            "Machine {} completed its lifecycle in {:?}",
            req.machine_name,
            started.elapsed()
        );

        Ok(PipelineReport {
            machine_name: req.machine_name.clone(),
            machine_id,
            image,
            converted,
            final_state,
            elapsed: started.elapsed(),
        })
    }

    async fn cycle(
        &self,
        machine: &mut Machine,
        hold: Duration,
        on_stage: &(dyn Fn(Stage) + Send + Sync),
    ) -> UtahResult<()> {
        on_stage(Stage::Boot);
        machine.start().await?;
        machine.wait_for_state(MachineState::Running, self.wait).await?;

        on_stage(Stage::Hold);
        if !hold.is_zero() {
            debug!("Holding {} for {:?}", machine.name(), hold);
            tokio::time::sleep(hold).await;
        }

        on_stage(Stage::PowerOff);
        machine.stop().await?;
        machine.wait_for_state(MachineState::Poweroff, self.wait).await
    }
}

/// Best-effort poweroff and delete after a failed run
async fn teardown(machine: &mut Machine) {
    warn!("Tearing down machine {}", machine.name());

    if matches!(
        machine.state().await,
        MachineState::Running | MachineState::Paused | MachineState::Transitioning
    ) {
        if let Err(e) = machine.stop().await {
            warn!("Teardown poweroff of {} failed: {}", machine.name(), e);
        }
    }

    if let Err(e) = machine.delete().await {
        warn!("Teardown delete of {} failed: {}", machine.name(), e);
    }
}

/// Last path segment of `url`, without query or fragment
pub fn entry_name_from_url(url: &str) -> UtahResult<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();

    if name.is_empty() || !path.contains('/') {
        return Err(UtahError::InvalidEntryName {
            name: name.to_string(),
            reason: format!("cannot derive a file name from {}", url),
        });
    }

    Ok(name.to_string())
}

/// `focal.img` → `focal.vdi`
pub fn converted_entry_name(image_name: &str, format: &str) -> String {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    format!("{}.{}", stem, format)
}
