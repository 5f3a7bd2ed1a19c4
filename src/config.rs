//! Configuration for watchers and logging.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FILE_EVENTS_` and use double
//! underscores to separate nested levels:
//! - `FILE_EVENTS_WATCHER__START_TIMEOUT_MS=10000` sets `watcher.start_timeout_ms`
//! - `FILE_EVENTS_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".file-events";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "FILE_EVENTS_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watcher lifecycle and delivery settings
    #[serde(default)]
    pub watcher: WatcherSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherSettings {
    /// How long `initialize` waits for the engine to confirm it is watching
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Default wait used by callers awaiting termination after shutdown
    #[serde(default = "default_termination_timeout_ms")]
    pub termination_timeout_ms: u64,

    /// Capacity of the per-watcher delivery queue before it overflows
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Watch whole hierarchies instead of single directories
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_start_timeout_ms() -> u64 {
    5_000
}
fn default_termination_timeout_ms() -> u64 {
    5_000
}
fn default_event_queue_capacity() -> usize {
    16 * 1024
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watcher: WatcherSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            termination_timeout_ms: default_termination_timeout_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            recursive: false,
        }
    }
}

impl WatcherSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore
            // stays part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by walking up from the current directory
    fn find_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}
