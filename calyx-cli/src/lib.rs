//! Shared bootstrap for the calyx binaries: common flags, logging setup,
//! configuration loading.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::PathBuf;

use calyx_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use calyx_core::Config;

/// Flags every calyx binary takes.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    pub json_logs: bool,

    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    pub config: PathBuf,
}

impl CommonArgs {
    /// Initialize logging from the flags; a bad level is an init failure.
    pub fn init_logging(&self) -> Result<()> {
        let level = LogLevel::from_str(&self.log_level)
            .ok_or_else(|| anyhow!("invalid log level '{}'", self.log_level))?;
        init_logging_with_config(LogConfig::new(level).json_format(self.json_logs))?;
        Ok(())
    }

    /// Load and validate the configuration file.
    pub fn load_config(&self) -> Result<Config> {
        Config::from_file(&self.config)
            .with_context(|| format!("loading configuration from {}", self.config.display()))
    }
}
