//! Disk image conversion
//!
//! Converts cached cloud images into the backend's native disk format by
//! running `qemu-img convert`. The tool writes to a temp sibling that is
//! renamed onto the destination only after a clean exit, so a destination
//! that already exists is proof of an earlier successful conversion.

use crate::cache::store::temp_file_name;
use crate::config::schema::ConvertConfig;
use crate::error::{UtahError, UtahResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs the external conversion tool
#[derive(Debug, Clone)]
pub struct ImageConverter {
    tool: String,
    format: String,
    timeout: Option<Duration>,
}

impl ImageConverter {
    /// Create a converter from config
    pub fn new(config: &ConvertConfig) -> Self {
        Self {
            tool: config.tool.clone(),
            format: config.format.clone(),
            timeout: config.timeout(),
        }
    }

    /// Output format passed to the tool
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Convert `src` into `dst`, doing nothing if `dst` already exists
    pub async fn convert(&self, src: &Path, dst: &Path) -> UtahResult<()> {
        if dst.exists() {
            info!("{} already exists, skipping conversion", dst.display());
            return Ok(());
        }

        info!(
            "Converting {} to {} ({})",
            src.display(),
            dst.display(),
            self.format
        );

        let temp = temp_sibling(dst)?;
        match self.run_tool(src, &temp).await {
            Ok(()) => tokio::fs::rename(&temp, dst).await.map_err(|e| {
                UtahError::cache_io(
                    format!("renaming {} to {}", temp.display(), dst.display()),
                    e,
                )
            }),
            Err(e) => {
                discard(&temp).await;
                Err(e)
            }
        }
    }

    async fn run_tool(&self, src: &Path, out: &Path) -> UtahResult<()> {
        let mut cmd = Command::new(&self.tool);
        cmd.arg("convert")
            .arg("-O")
            .arg(&self.format)
            .arg(src.as_os_str())
            .arg(out.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("Executing: {} {:?}", self.tool, cmd.as_std().get_args().collect::<Vec<&OsStr>>());

        // On timeout the dropped child is killed before the caller discards its output
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| UtahError::ConversionTimeout { timeout })?,
            None => cmd.output().await,
        }
        .map_err(|e| UtahError::ConversionIo {
            tool: self.tool.clone(),
            source: e,
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            Err(UtahError::Conversion { stderr })
        }
    }
}

/// Temp path next to `dst`, named so `cache clean` sweeps it
fn temp_sibling(dst: &Path) -> UtahResult<PathBuf> {
    let name = dst.file_name().ok_or_else(|| UtahError::InvalidEntryName {
        name: dst.display().to_string(),
        reason: "conversion destination has no file name".to_string(),
    })?;
    Ok(dst.with_file_name(temp_file_name(&name.to_string_lossy())))
}

async fn discard(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => debug!("Removed partial conversion output {}", temp.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", temp.display(), e),
    }
}
