//! Meet Configuration
//!
//! Top-level configuration of the simulator binary: competition layout,
//! performance table, optional master seed and snapshot directory. Read
//! from the JSON file named by `SWIM_MEET_CONFIG`, defaults otherwise.

use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::meet::competition::CompetitionConfig;
use crate::meet::error::CompetitionError;
use crate::meet::racer::PerformanceTable;
use crate::persistence::store::{FileStore, StoreError};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SWIM_MEET_CONFIG";

/// Shortest pool length accepted by [`MeetConfig::clamped`].
pub const MIN_POOL_LENGTH: u32 = 5;

/// Longest pool length accepted by [`MeetConfig::clamped`].
pub const MAX_POOL_LENGTH: u32 = 1000;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`MeetConfig`].
    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values are out of range.
    #[error(transparent)]
    Invalid(#[from] CompetitionError),
}

/// Simulator configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetConfig {
    /// Pool and timing.
    pub competition: CompetitionConfig,
    /// Racer performance constants.
    pub performance: PerformanceTable,
    /// Master seed for reproducible racers. Fresh entropy when absent.
    pub seed: Option<u64>,
    /// Snapshot directory. `~/.swim-meet-simulator/` when absent.
    pub store_dir: Option<PathBuf>,
}

impl MeetConfig {
    /// Load from the file named by `SWIM_MEET_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?.clamped();
        config.validate()?;
        Ok(config)
    }

    /// Pool length pulled into the supported range.
    pub fn clamped(mut self) -> Self {
        self.competition.lane_length = self.competition.lane_length.clamp(MIN_POOL_LENGTH, MAX_POOL_LENGTH);
        self
    }

    /// Check competition layout and performance table.
    pub fn validate(&self) -> Result<(), CompetitionError> {
        self.competition.validate()?;
        self.performance.validate()
    }

    /// Snapshot store for this configuration.
    pub fn store(&self) -> Result<FileStore, StoreError> {
        match &self.store_dir {
            Some(dir) => Ok(FileStore::new(dir.clone())),
            None => FileStore::in_home(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
