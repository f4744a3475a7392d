//! Cache command - inspect and clean the image cache

use crate::cache::{CacheStore, CachedFile, HttpFetcher};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::cli::commands::format_bytes;
use crate::config::Config;
use crate::error::UtahResult;
use crate::ui::{self, UiContext};
use console::style;
use std::sync::Arc;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> UtahResult<()> {
    let store = CacheStore::new(&config.cache, Arc::new(HttpFetcher::new(&config.download)));

    match args.action {
        CacheAction::List { format } => list(&store, format).await,
        CacheAction::Clean => clean(&store).await,
        CacheAction::Path => {
            println!("{}", store.root().display());
            Ok(())
        }
    }
}

async fn list(store: &CacheStore, format: OutputFormat) -> UtahResult<()> {
    let files = store.list().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
        OutputFormat::Plain => {
            for file in &files {
                println!("{}", file.name);
            }
        }
        OutputFormat::Table if files.is_empty() => {
            let ctx = UiContext::detect();
            ui::step_info(&ctx, &format!("Cache at {} is empty", store.root().display()));
        }
        OutputFormat::Table => print_table(&files),
    }

    Ok(())
}

fn print_table(files: &[CachedFile]) {
    println!(
        "{:<48} {:>10} {:<17}",
        style("NAME").bold(),
        style("SIZE").bold(),
        style("MODIFIED").bold()
    );
    println!("{}", "-".repeat(77));

    for file in files {
        let modified = file
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = if file.temporary {
            style(format!("{} (partial)", file.name)).yellow().to_string()
        } else {
            file.name.clone()
        };
        println!("{:<48} {:>10} {:<17}", name, format_bytes(file.size), modified);
    }

    let total: u64 = files.iter().map(|f| f.size).sum();
    println!();
    println!("{} file(s), {}", files.len(), format_bytes(total));
}

async fn clean(store: &CacheStore) -> UtahResult<()> {
    let ctx = UiContext::detect();
    let removed = store.sweep_temp_files().await?;

    if removed == 0 {
        ui::step_info(&ctx, "No partial downloads to remove");
    } else {
        ui::step_ok(&ctx, &format!("Removed {} partial download(s)", removed));
    }
    Ok(())
}
