//! Run command - fetch, convert, provision and cycle one machine

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::error::{UtahError, UtahResult};
use crate::pipeline::{Pipeline, PipelineRequest, Stage};
use crate::ui::{self, StageProgress, UiContext};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> UtahResult<()> {
    let ctx = UiContext::detect();
    let req = build_request(&args)?;
    let pipeline = Pipeline::from_config(config);

    ui::intro(&ctx, &format!("utah run {}", req.machine_name));

    if args.no_boot {
        let progress = StageProgress::new(&ctx, Stage::Provision.position());
        let result = interruptible(pipeline.provision(&req, &|s| progress.begin(s))).await;
        progress.finish();

        let machine = result?;
        ui::step_ok_detail(&ctx, &format!("Provisioned {}", machine.name()), machine.id());
        ui::key_value(&ctx, "Backing file", &machine.backing_file().display().to_string());
        ui::outro_success(&ctx, "Machine left powered off");
        return Ok(());
    }

    let progress = StageProgress::new(&ctx, Stage::ALL.len());
    let result = interruptible(pipeline.run(&req, &|s| progress.begin(s))).await;
    progress.finish();

    let report = result?;
    ui::step_ok_detail(&ctx, "Cached image", &report.image.display().to_string());
    ui::step_ok_detail(&ctx, "Converted image", &report.converted.display().to_string());
    ui::step_ok_detail(
        &ctx,
        &format!("Cycled machine {}", report.machine_name),
        &report.machine_id,
    );
    ui::key_value(&ctx, "Final state", &report.final_state.to_string());
    ui::outro_success(&ctx, &format!("Done in {}s", report.elapsed.as_secs()));

    Ok(())
}

fn build_request(args: &RunArgs) -> UtahResult<PipelineRequest> {
    let mut req = PipelineRequest::new(args.url.as_str(), args.name.as_str())?;
    if let Some(image_name) = &args.image_name {
        req.image_name = image_name.clone();
    }
    req.converted_name = args.converted_name.clone();
    req.expected_sha256 = args.sha256.clone();
    req.hold = Duration::from_secs(args.hold);
    Ok(req)
}

/// Race `work` against Ctrl-C
///
/// Dropping `work` kills any child process it is waiting on.
async fn interruptible<T>(work: impl Future<Output = UtahResult<T>>) -> UtahResult<T> {
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning in-flight work");
            Err(UtahError::Interrupted)
        }
    }
}
