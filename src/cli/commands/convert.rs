//! Convert command - convert a cached image to the backend's disk format

use crate::cache::{CacheStore, EntryState, HttpFetcher};
use crate::cli::args::ConvertArgs;
use crate::config::Config;
use crate::convert::ImageConverter;
use crate::error::{UtahError, UtahResult};
use crate::pipeline::converted_entry_name;
use crate::ui::{self, TaskSpinner, UiContext};
use std::io;
use std::sync::Arc;

/// Execute the convert command
pub async fn execute(args: ConvertArgs, config: &Config) -> UtahResult<()> {
    let ctx = UiContext::detect();

    let mut convert_config = config.convert.clone();
    if let Some(format) = args.format {
        convert_config.format = format;
    }
    let converter = ImageConverter::new(&convert_config);

    let store = CacheStore::new(&config.cache, Arc::new(HttpFetcher::new(&config.download)));
    let output = args
        .output
        .unwrap_or_else(|| converted_entry_name(&args.source, converter.format()));

    let src = store.entry_path(&args.source)?;
    let dst = store.entry_path(&output)?;

    if store.entry_state(&output)? != EntryState::Present
        && store.entry_state(&args.source)? != EntryState::Present
    {
        return Err(UtahError::cache_io(
            format!("cache entry {} is not present", args.source),
            io::Error::from(io::ErrorKind::NotFound),
        ));
    }

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Converting {} to {}", args.source, output));

    match converter.convert(&src, &dst).await {
        Ok(()) => {
            spinner.stop(&format!("Converted {}", args.source));
            ui::key_value(&ctx, "Path", &dst.display().to_string());
            Ok(())
        }
        Err(e) => {
            spinner.stop_error(&format!("Failed to convert {}", args.source));
            Err(e)
        }
    }
}
