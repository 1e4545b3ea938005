//! # Configuration Management Module
//!
//! Persistent settings shared by the wearable and handheld sides.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `capability`: Capability tag the wearable advertises and the handheld queries
//! - `sampling_period_us`: Sensor sampling interval (20000 = 50 Hz)
//! - `flush_threshold`: Readings held in memory before they are spooled to disk
//! - `downloads_dir`: Where received CSV files land (defaults to the user's Downloads)
//! - `demo_duration_secs`: How long the bundled binary records before stopping
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/sensor-link/config.toml
//! - Linux: ~/.config/sensor-link/config.toml
//! - Windows: %APPDATA%\sensor-link\config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::ConfigError;
use crate::reading::SAMPLING_PERIOD_US;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capability: String,
    pub sampling_period_us: u64,
    pub flush_threshold: usize,
    pub downloads_dir: Option<PathBuf>,
    pub demo_duration_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capability: "sensor_recording".to_string(),
            sampling_period_us: SAMPLING_PERIOD_US,
            flush_threshold: 4096,
            downloads_dir: None,
            demo_duration_secs: 3,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-link")
            .join("config.toml")
    }

    /// Load config from the platform location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Save config to the platform location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)
                    .map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, create default
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string)
            .map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_micros(self.sampling_period_us)
    }

    /// Directory received artifacts are written to
    pub fn downloads_dir(&self) -> PathBuf {
        self.downloads_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
