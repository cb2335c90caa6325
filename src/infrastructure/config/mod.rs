//! Application configuration.

/// Configuration model and defaults.
pub mod app_config;
/// Command-line arguments.
pub mod args;
/// Config file location and loading.
pub mod storage;

pub use app_config::{AppConfig, CacheConfig, LogLevel};
pub use args::{CliArgs, Command};
pub use storage::{ConfigError, StorageManager};
