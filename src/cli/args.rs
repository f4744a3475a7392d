//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Image booted when `run` is given no URL
pub const DEFAULT_IMAGE_URL: &str =
    "https://cloud-images.ubuntu.com/trusty/current/trusty-server-cloudimg-amd64-disk1.img";

/// Utah - ephemeral VirtualBox machines from cloud disk images
///
/// Downloads a cloud image once, converts it to VDI and boots a throwaway
/// VirtualBox machine from a private copy.
#[derive(Parser, Debug)]
#[command(name = "utah")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "UTAH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, env = "UTAH_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, convert, provision and cycle a machine through its lifecycle
    Run(RunArgs),

    /// Download an image into the cache
    Fetch(FetchArgs),

    /// Convert a cached image to the backend's disk format
    Convert(ConvertArgs),

    /// Check that VirtualBox and qemu-img are usable
    Status,

    /// Inspect and clean the image cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Cloud image URL
    #[arg(short, long, default_value = DEFAULT_IMAGE_URL)]
    pub url: String,

    /// Machine name
    #[arg(short, long, default_value = "utah-test0")]
    pub name: String,

    /// Cache entry name for the download (defaults to the URL's file name)
    #[arg(long)]
    pub image_name: Option<String>,

    /// Cache entry name for the converted image
    #[arg(long)]
    pub converted_name: Option<String>,

    /// Expected SHA-256 of the download (hex)
    #[arg(long)]
    pub sha256: Option<String>,

    /// Seconds to keep the machine running before powering it off
    #[arg(long, default_value = "0")]
    pub hold: u64,

    /// Stop after provisioning, leaving the machine powered off
    #[arg(long)]
    pub no_boot: bool,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Image URL
    pub url: String,

    /// Cache entry name (defaults to the URL's file name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Expected SHA-256 of the download (hex)
    #[arg(long)]
    pub sha256: Option<String>,
}

/// Arguments for the convert command
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// Cache entry to convert
    pub source: String,

    /// Cache entry name for the result (defaults to the source name with the format's extension)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Output format passed to the conversion tool (defaults to config)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached files
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove files left behind by interrupted downloads
    Clean,

    /// Print the cache root
    Path,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: Shell,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// One name per line
    Plain,
}

/// Format of log lines on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
