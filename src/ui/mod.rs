//! Terminal output for the CLI
//!
//! Interactive terminals get `cliclack` step markers and spinners; CI and
//! piped output fall back to plain bracketed lines.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{intro, key_value, outro_success, remark, step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::{StageProgress, TaskSpinner};
