//! Configuration management for mounttab

pub mod schema;

pub use schema::{Config, LockConfig, ParserConfig, PathsConfig};

use crate::error::{MountError, MountResult};
use crate::utils::{ENV_FSTAB, ENV_MTAB};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mounttab")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file is missing.
    ///
    /// `MOUNTTAB_FSTAB` and `MOUNTTAB_MTAB` override the table paths of
    /// the file.
    pub fn load(&self) -> MountResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path)?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        for (var, path) in [
            (ENV_FSTAB, &mut config.paths.fstab),
            (ENV_MTAB, &mut config.paths.mtab),
        ] {
            if let Some(value) = env::var_os(var).filter(|v| !v.is_empty()) {
                debug!("{} overrides {}", var, path.display());
                *path = PathBuf::from(value);
            }
        }
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, path: &Path) -> MountResult<Config> {
        let content = fs::read_to_string(path)
            .map_err(|e| MountError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| MountError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        check_lock_settings(&config).map_err(|reason| MountError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> MountResult<()> {
        self.ensure_config_dir()?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).map_err(|e| {
            MountError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    fn ensure_config_dir(&self) -> MountResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| MountError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// A zero timeout fails every contended lock and a zero delay spins
fn check_lock_settings(config: &Config) -> Result<(), String> {
    if config.lock.timeout_secs == 0 {
        return Err("lock.timeout_secs must be at least 1".to_string());
    }
    if config.lock.retry_delay_ms == 0 {
        return Err("lock.retry_delay_ms must be at least 1".to_string());
    }
    Ok(())
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
