//! Settings loading via Figment.
//!
//! Configuration is layered from three sources, later ones overriding
//! earlier ones:
//!
//! 1. Built-in defaults (always valid — no file is required)
//! 2. A `benchrun.toml` file, if present
//! 3. Environment variables prefixed with `BENCHRUN_` (nested keys
//!    separated by `__`, e.g. `BENCHRUN_STORAGE__DATA_DIR=/tmp/data`)
//!
//! # Example
//! ```no_run
//! use benchrun::config::Settings;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let settings = Settings::load()?;
//! println!("data dir: {}", settings.storage.data_dir.display());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Durable storage layout.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Log history limits.
    #[serde(default)]
    pub logging: LogSettings,
    /// Live plotting cadence.
    #[serde(default)]
    pub plot: PlotSettings,
}

/// Where and how run records are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Base directory for run output files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Whether runs are grouped into per-day subdirectories.
    #[serde(default = "default_use_date_subfolder")]
    pub use_date_subfolder: bool,
    /// `chrono` format string for the per-day subdirectory name.
    #[serde(default = "default_date_folder_format")]
    pub date_folder_format: String,
    /// `chrono` format string for the timestamp in run file names.
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

/// Bounds for the in-memory log history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Maximum number of retained log records per run; the oldest record is
    /// evicted when the history is full.
    #[serde(default = "default_log_capacity")]
    pub history_capacity: usize,
}

/// Cadence hints for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotSettings {
    /// Recommended interval between coordinator ticks (e.g. `"100ms"`).
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_use_date_subfolder() -> bool {
    true
}

fn default_date_folder_format() -> String {
    "%y%m%d".to_string()
}

fn default_timestamp_format() -> String {
    "%Y%m%d-%H%M%S".to_string()
}

fn default_log_capacity() -> usize {
    5000
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            use_date_subfolder: default_use_date_subfolder(),
            date_folder_format: default_date_folder_format(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            history_capacity: default_log_capacity(),
        }
    }
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

impl Settings {
    /// Load settings from `benchrun.toml` and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("benchrun.toml")
    }

    /// Load settings from a specific TOML file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BENCHRUN_").split("__"))
            .extract()
    }
}
