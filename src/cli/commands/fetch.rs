//! Fetch command - download an image into the cache

use crate::cache::{CacheStore, HttpFetcher};
use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::UtahResult;
use crate::pipeline::entry_name_from_url;
use crate::ui::{self, TaskSpinner, UiContext};
use std::sync::Arc;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> UtahResult<()> {
    let ctx = UiContext::detect();
    let name = match args.name {
        Some(name) => name,
        None => entry_name_from_url(&args.url)?,
    };

    let store = CacheStore::new(&config.cache, Arc::new(HttpFetcher::new(&config.download)));

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Fetching {}", name));

    match store.fetch_verified(&args.url, &name, args.sha256.as_deref()).await {
        Ok(path) => {
            spinner.stop(&format!("Cached {}", name));
            ui::key_value(&ctx, "Path", &path.display().to_string());
            Ok(())
        }
        Err(e) => {
            spinner.stop_error(&format!("Failed to fetch {}", name));
            Err(e)
        }
    }
}
