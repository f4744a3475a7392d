//! Status command - check VirtualBox, qemu-img and the cache

use crate::config::Config;
use crate::error::UtahResult;
use crate::ui::{self, UiContext};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute the status command
pub async fn execute(config: &Config) -> UtahResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "utah status");

    let mut all_ok = true;
    let vbox = &config.backend.program;

    match probe(vbox, &["--version"]).await {
        Some(version) => ui::step_ok_detail(&ctx, "VirtualBox", first_line(&version)),
        None => {
            ui::step_warn_hint(
                &ctx,
                &format!("{} not found", vbox),
                "Install VirtualBox and make sure VBoxManage is on PATH",
            );
            all_ok = false;
        }
    }

    let network = &config.machine.host_only_network;
    match probe(vbox, &["list", "hostonlyifs"]).await {
        Some(output) if has_host_only_network(&output, network) => {
            ui::step_ok_detail(&ctx, "Host-only network", network)
        }
        _ => {
            ui::step_warn_hint(
                &ctx,
                &format!("Host-only network {} not found", network),
                "Run: VBoxManage hostonlyif create",
            );
            all_ok = false;
        }
    }

    let tool = &config.convert.tool;
    match probe(tool, &["--version"]).await {
        Some(version) => ui::step_ok_detail(&ctx, "Conversion tool", first_line(&version)),
        None => {
            ui::step_warn_hint(
                &ctx,
                &format!("{} not found", tool),
                "Install qemu-img (qemu-utils on Debian/Ubuntu, qemu-img on Fedora)",
            );
            all_ok = false;
        }
    }

    let root = &config.cache.root;
    if root.is_dir() {
        ui::step_ok_detail(&ctx, "Cache", &root.display().to_string());
    } else {
        ui::step_info(
            &ctx,
            &format!("Cache {} will be created on first fetch", root.display()),
        );
    }

    if all_ok {
        ui::outro_success(&ctx, "All checks passed");
    } else {
        ui::remark(&ctx, "Some checks failed - see above for details");
    }

    Ok(())
}

/// Stdout of a successful `program args`, or `None`
async fn probe(program: &str, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        other => {
            debug!("Probe {} {:?} failed: {:?}", program, args, other.map(|r| r.map(|o| o.status)));
            None
        }
    }
}

fn first_line(output: &str) -> &str {
    output.lines().next().unwrap_or_default().trim()
}

/// Whether `VBoxManage list hostonlyifs` output names `network`
fn has_host_only_network(output: &str, network: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("Name:"))
        .any(|name| name.trim() == network)
}
