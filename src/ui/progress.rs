//! Spinners and stage progress with plain fallbacks

use super::context::UiContext;
use crate::pipeline::Stage;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for a single long-running task
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.is_interactive(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// Progress over the stages of a pipeline run
///
/// Usable as the pipeline's stage callback.
pub struct StageProgress {
    bar: Option<ProgressBar>,
    total: usize,
}

impl StageProgress {
    /// Progress for a run of `total` stages
    pub fn new(ctx: &UiContext, total: usize) -> Self {
        let bar = ctx.is_interactive().then(|| {
            let bar = ProgressBar::new(total as u64);
            if let Ok(bar_style) = ProgressStyle::with_template(
                "  {spinner:.cyan} [{pos}/{len}] {msg}  {elapsed:.dim}",
            ) {
                bar.set_style(bar_style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self { bar, total }
    }

    /// Report that `stage` has begun
    pub fn begin(&self, stage: Stage) {
        let position = stage.position().min(self.total);
        match &self.bar {
            Some(bar) => {
                bar.set_position(position.saturating_sub(1) as u64);
                bar.set_message(stage.to_string());
            }
            None => println!("  [{}/{}] {}", position, self.total, stage),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
