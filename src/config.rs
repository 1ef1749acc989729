//! Storage-root configuration.
//!
//! Everything the engine persists lives under one root directory. The root and the
//! lock polling parameters travel together in a [`Config`] value that is handed to the
//! storage engine and from there to the lock manager.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming the directory under which `multidb/` is placed.
pub const PREFIX_ENV: &str = "MULTIDB_PREFIX";

const BASE_DIR: &str = "multidb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Storage root. `data/` lives directly beneath it.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Delay between attempts to take a held table lock.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Age after which a lock file is considered abandoned and acquisition fails.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_lock_poll_interval_ms() -> u64 {
    1000
}

fn default_lock_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Builds the configuration the command-line tool uses: `$MULTIDB_PREFIX/multidb`,
    /// with the prefix defaulting to the current directory.
    pub fn from_env() -> Self {
        let prefix = env::var_os(PREFIX_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(prefix.join(BASE_DIR))
    }

    /// Loads a JSON configuration file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::Config("storage root must not be empty".to_string()));
        }
        if self.lock_timeout_secs == 0 {
            return Err(Error::Config("lock_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.data_dir().join("schema")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir().join("tables")
    }

    pub fn purgatory_dir(&self) -> PathBuf {
        self.data_dir().join("purgatory")
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
