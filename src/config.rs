//! Layered configuration for the watch subsystem.
//!
//! Sources, later ones winning:
//! - Default values
//! - `linkwatch.toml` in the current directory (or an explicit path)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Variables are prefixed with `LW_` and use double underscores to
//! separate nested levels:
//! - `LW_POLLING__HIGH_INTERVAL_MS=100` sets `polling.high_interval_ms`
//! - `LW_COALESCE_WINDOW_MS=0` sets `coalesce_window_ms`

use std::collections::HashMap;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Watch subsystem configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Window in which identical consecutive (path, kind) deliveries
    /// collapse into one. Zero disables coalescing.
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,

    /// Polling intervals and tier decay.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window_ms(),
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_coalesce_window_ms() -> u64 {
    50
}

/// Intervals for the polling engine's priority tiers.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_high_interval_ms")]
    pub high_interval_ms: u64,
    #[serde(default = "default_medium_interval_ms")]
    pub medium_interval_ms: u64,
    #[serde(default = "default_low_interval_ms")]
    pub low_interval_ms: u64,
    /// Unchanged polls before a tiered target decays one tier.
    #[serde(default = "default_decay_threshold")]
    pub decay_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            high_interval_ms: default_high_interval_ms(),
            medium_interval_ms: default_medium_interval_ms(),
            low_interval_ms: default_low_interval_ms(),
            decay_threshold: default_decay_threshold(),
        }
    }
}

fn default_high_interval_ms() -> u64 {
    250
}

fn default_medium_interval_ms() -> u64 {
    500
}

fn default_low_interval_ms() -> u64 {
    2000
}

fn default_decay_threshold() -> u32 {
    16
}

/// Logging levels: a default plus per-module overrides.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, or trace.
    #[serde(default = "default_log_level")]
    pub default: String,
    /// Per-module overrides, e.g. `polling = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl WatchConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from("linkwatch.toml")
    }

    /// Load configuration from a specific file, still layering defaults
    /// below and environment variables above.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(WatchConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LW_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }
}
