use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "pixcache",
    version,
    about = "Load images through a two-tier memory and disk cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Directory of bundled resources named `<id>` or `<id>.<ext>`.
    #[arg(long, value_name = "PATH")]
    pub resources: Option<PathBuf>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", env = "PIXCACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache capacity in bytes.
    #[arg(long, value_name = "BYTES")]
    pub memory_cache_bytes: Option<usize>,

    /// Disk cache size cap in bytes.
    #[arg(long, value_name = "BYTES")]
    pub disk_max_size: Option<u64>,

    /// Maximum decoded width.
    #[arg(long)]
    pub max_width: Option<u32>,

    /// Maximum decoded height.
    #[arg(long)]
    pub max_height: Option<u32>,

    /// HTTP request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load an image by URL.
    Remote {
        /// Image URL.
        url: String,
        /// Write the decoded image here as PNG.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Load a bundled resource by id.
    Drawable {
        /// Resource id.
        id: u32,
        /// Write the decoded image here as PNG.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Remove every file from the disk cache.
    Clear,
}
