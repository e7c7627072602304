//! Configuration management
//!
//! Handles loading and validating pool configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::pool::{DEFAULT_BLOCKS_PER_SLAB, DEFAULT_BLOCK_SIZE};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub stress: StressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Memory pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Fixed lease size in bytes (power of two)
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Blocks carved from each slab
    #[serde(default = "default_blocks_per_slab")]
    pub blocks_per_slab: usize,
}

/// Diagnostic wrapper configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    /// Accept returns after pool disposal instead of reporting leaks
    #[serde(default)]
    pub allow_late_return: bool,
    /// Upper bound for the shutdown drain in seconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

/// Stress runner configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StressConfig {
    /// Number of worker tasks (0 = auto)
    #[serde(default)]
    pub workers: usize,
    /// Rent/return iterations per worker
    #[serde(default = "default_iterations")]
    pub iterations_per_worker: u64,
    /// Leases each worker holds before releasing the batch
    #[serde(default = "default_max_blocks_held")]
    pub max_blocks_held: usize,
}

impl StressConfig {
    /// Get effective worker count (auto-detect if 0)
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_block_size() -> usize { DEFAULT_BLOCK_SIZE }
fn default_blocks_per_slab() -> usize { DEFAULT_BLOCKS_PER_SLAB }
fn default_drain_timeout() -> u64 { 10 }
fn default_iterations() -> u64 { 100_000 }
fn default_max_blocks_held() -> usize { 16 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            blocks_per_slab: default_blocks_per_slab(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            allow_late_return: false,
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            iterations_per_worker: default_iterations(),
            max_blocks_held: default_max_blocks_held(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            stress: StressConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.pool.block_size.is_power_of_two() {
            anyhow::bail!("block_size must be a nonzero power of two");
        }
        if self.pool.blocks_per_slab == 0 {
            anyhow::bail!("blocks_per_slab must be > 0");
        }
        if self.diagnostics.drain_timeout_secs == 0 {
            anyhow::bail!("drain_timeout_secs must be > 0");
        }
        if self.stress.max_blocks_held == 0 {
            anyhow::bail!("max_blocks_held must be > 0");
        }
        Ok(())
    }
}
