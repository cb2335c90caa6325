//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::args::CliArgs;
use crate::infrastructure::image::{DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH};

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path the configuration was loaded from.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory of bundled resources named `<id>` or `<id>.<ext>`.
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,

    /// Image cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Image cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disk cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub disk_cache_dir: Option<PathBuf>,

    /// Memory cache capacity in bytes of decoded pixels.
    /// Defaults to one eighth of the memory available to the process.
    #[serde(default)]
    pub memory_cache_bytes: Option<usize>,

    /// Disk cache size cap in bytes. Unbounded when unset.
    #[serde(default)]
    pub disk_max_size: Option<u64>,

    /// Maximum decoded width before downsampling.
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Maximum decoded height before downsampling.
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// HTTP request timeout in seconds. Transport default when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CacheConfig {
    /// HTTP timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

const fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

const fn default_max_height() -> u32 {
    DEFAULT_MAX_HEIGHT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disk_cache_dir: None,
            memory_cache_bytes: None,
            disk_max_size: None,
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
            timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(resources) = &args.resources {
            self.resources_dir = Some(resources.clone());
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.disk_cache_dir = Some(cache_dir.clone());
        }
        if let Some(bytes) = args.memory_cache_bytes {
            self.cache.memory_cache_bytes = Some(bytes);
        }
        if let Some(max_size) = args.disk_max_size {
            self.cache.disk_max_size = Some(max_size);
        }
        if let Some(max_width) = args.max_width {
            self.cache.max_width = max_width;
        }
        if let Some(max_height) = args.max_height {
            self.cache.max_height = max_height;
        }
        if let Some(timeout) = args.timeout_secs {
            self.cache.timeout_secs = Some(timeout);
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            resources_dir: None,
            cache: CacheConfig::default(),
        }
    }
}
