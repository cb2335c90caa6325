//! Config file discovery and loading.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::app_config::AppConfig;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "pixcache";
const APP_NAME: &str = "pixcache";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while locating or seeding the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No platform config directory could be determined.
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The default config could not be rendered.
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Reads `config.toml` from the platform config directory or an explicit path.
#[derive(Debug)]
pub struct StorageManager {
    config_dir: PathBuf,
}

impl StorageManager {
    /// Uses the platform config directory (e.g. `~/.config/pixcache`).
    ///
    /// # Errors
    /// Returns `ConfigDirNotFound` if no home directory is known.
    pub fn new() -> Result<Self, ConfigError> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| Self::with_dir(dirs.config_dir().to_path_buf()))
            .ok_or(ConfigError::ConfigDirNotFound)
    }

    /// Uses `config_dir` instead of the platform directory.
    #[must_use]
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Directory searched when no explicit path is given.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The file that [`StorageManager::load_config`] reads for `path_override`.
    #[must_use]
    pub fn config_path(&self, path_override: Option<&Path>) -> PathBuf {
        path_override.map_or_else(|| self.config_dir.join(CONFIG_FILE_NAME), Path::to_path_buf)
    }

    /// Loads configuration.
    ///
    /// A missing file is seeded with defaults so users have something to
    /// edit. A file that does not parse is left alone and defaults are used.
    /// The returned config remembers the path it came from.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read, or the default
    /// file cannot be written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let path = self.config_path(path_override);

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str::<AppConfig>(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                AppConfig::default()
            })
        } else {
            info!(path = %path.display(), "No config file, writing defaults");
            let config = AppConfig::default();
            write_default(&path, &config)?;
            config
        };

        debug!(path = %path.display(), "Loaded configuration");
        config.config = Some(path);
        Ok(config)
    }
}

fn write_default(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("config path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(content.as_bytes())?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
