// src/config.rs
//
// Configuration file parsing. A TOML file selects the data directories,
// the update cadence, and the pricing constants; every field has a default
// so an empty file (or none at all) still yields a runnable setup.

use crate::analytics::chain::ChainPaths;
use crate::analytics::iv_history::IvHistoryPaths;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Configuration Types
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,
    /// Data locations
    #[serde(default)]
    pub data: DataConfig,
}

/// Global configuration settings.
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Status/data API port (None = no API server)
    pub api_port: Option<u16>,
    /// Log level
    pub log_level: Option<String>,
    /// Pipeline interval in seconds
    #[serde(default = "default_interval_secs")]
    pub update_interval_secs: u64,
    /// Flat annualized risk-free rate used by the pricing model
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            api_port: None,
            log_level: None,
            update_interval_secs: default_interval_secs(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}

fn default_risk_free_rate() -> f64 {
    0.36
}

/// Where the normalized input tables live and where artifacts go.
#[derive(Debug, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data/normalized")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/derived")
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, String> {
        toml::from_str(s).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Paths consumed and produced by the chain build.
    pub fn chain_paths(&self) -> ChainPaths {
        ChainPaths {
            live_contracts: self.data.input_dir.join("options_live.jsonl"),
            underlying_quotes: self.data.input_dir.join("underlying_live.jsonl"),
            underlying_history: self.data.input_dir.join("underlying_history.jsonl"),
            artifact: self.data.output_dir.join("chain_snapshot.jsonl"),
        }
    }

    /// Paths consumed and produced by the IV-history build.
    pub fn iv_history_paths(&self) -> IvHistoryPaths {
        IvHistoryPaths {
            live_contracts: self.data.input_dir.join("options_live.jsonl"),
            option_history: self.data.input_dir.join("options_history.jsonl"),
            underlying_history: self.data.input_dir.join("underlying_history.jsonl"),
            artifact: self.data.output_dir.join("iv_history.jsonl"),
        }
    }
}

// =============================================================================
// Default Configuration
// =============================================================================

/// Returns a default configuration string for documentation.
pub fn default_config_template() -> &'static str {
    r#"# Chain Analyzer Configuration
#
# All fields are optional; the values below are the defaults.

[global]
# Status/data API port (omit to disable the server)
api_port = 8080

# Pipeline interval in seconds
update_interval_secs = 300

# Flat annualized risk-free rate for pricing and IV solving
risk_free_rate = 0.36

[data]
# Normalized input tables (written by the upstream fetch/normalize stages)
input_dir = "data/normalized"

# Derived artifacts (chain snapshot, IV history, cache sidecars)
output_dir = "data/derived"
"#
}

// =============================================================================
// Tests
// =============================================================================
