//! Configuration schema for mounttab
//!
//! Configuration is stored at `~/.config/mounttab/config.toml`

use crate::lock::{DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};
use crate::table::MtabSources;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mount table locations
    pub paths: PathsConfig,

    /// mtab lock settings
    pub lock: LockConfig,

    /// Parser settings
    pub parser: ParserConfig,
}

/// Mount table file locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// fstab path (/etc/fstab; $MOUNTTAB_FSTAB takes precedence)
    pub fstab: PathBuf,

    /// mtab path (/etc/mtab; $MOUNTTAB_MTAB takes precedence)
    pub mtab: PathBuf,

    /// Kernel mount table with mount IDs
    pub mountinfo: PathBuf,

    /// Fallback kernel mount table
    pub proc_mounts: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            fstab: utils::fstab_path(),
            mtab: utils::mtab_path(),
            mountinfo: PathBuf::from(utils::PATH_PROC_MOUNTINFO),
            proc_mounts: PathBuf::from(utils::PATH_PROC_MOUNTS),
        }
    }
}

impl PathsConfig {
    /// Lookup order for the running system's mount table
    pub fn mtab_sources(&self) -> MtabSources {
        MtabSources {
            mtab: self.mtab.clone(),
            mountinfo: self.mountinfo.clone(),
            proc_mounts: self.proc_mounts.clone(),
        }
    }
}

/// mtab lock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Give up waiting for another holder after this many seconds
    pub timeout_secs: u64,

    /// Pause between lock attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Use flock(2) on `<file>.lock` instead of the link protocol
    pub simple: bool,

    /// Block signals while the lock is held
    pub block_signals: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            simple: false,
            block_signals: false,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Parser configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Fail on the first malformed line instead of skipping it
    pub strict: bool,
}
