//! Utah - ephemeral VirtualBox machines from cloud disk images
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use utah::cli::{Cli, Commands, LogFormat};
use utah::config::ConfigManager;
use utah::error::UtahResult;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> UtahResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("utah=warn"),
        1 => EnvFilter::new("utah=info"),
        _ => EnvFilter::new("utah=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.without_time().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    // Completions don't need config loading
    if let Commands::Completions(args) = cli.command {
        return utah::cli::commands::completions(args);
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Run(args) => utah::cli::commands::run(args, &config).await,
        Commands::Fetch(args) => utah::cli::commands::fetch(args, &config).await,
        Commands::Convert(args) => utah::cli::commands::convert(args, &config).await,
        Commands::Status => utah::cli::commands::status(&config).await,
        Commands::Cache(args) => utah::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            utah::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
