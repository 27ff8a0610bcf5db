//! Configuration for all calyx binaries.
//!
//! One YAML file (`config.yml`) carries the protocol parameters and the
//! directory endpoint; the same struct rides inside the start-run bodies so
//! every participant runs a round under identical parameters. Loaded once
//! at startup and passed by value to each component.

use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;

pub use error::ConfigError;

/// Default minimum spacing between runs, in milliseconds.
pub const DEFAULT_TIME_BETWEEN_RUNS_MS: u64 = 10_000;

/// Directory (bulletin board) endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletinBoard {
    pub host: String,
    pub port: u16,
    #[serde(rename = "promPort", default)]
    pub prom_port: u16,
}

impl BulletinBoard {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Protocol and deployment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Minimum clients before a run starts.
    #[serde(rename = "N")]
    pub min_clients: usize,

    /// Minimum relays before a run starts.
    #[serde(rename = "n")]
    pub min_relays: usize,

    /// Payload onions per client per run.
    #[serde(rename = "x")]
    pub server_load: usize,

    /// Sepal bruise tolerance: recovery fails iff at least `d` mixers bruise.
    pub d: usize,

    /// Mixer and gatekeeper path lengths.
    pub l1: usize,
    pub l2: usize,

    /// Fractional checkpoint threshold for layer release.
    pub tao: f64,

    /// Fraction of relays the simulated adversary corrupts.
    pub chi: f64,

    /// Target drop-detection miss probability.
    pub delta: f64,

    /// Experiment hook: a corrupted relay drops every onion whose `from`
    /// equals this client address.
    #[serde(rename = "dropAllOnionsFromClient", default, skip_serializing_if = "Option::is_none")]
    pub drop_all_onions_from_client: Option<String>,

    /// Prometheus scrape period in milliseconds.
    #[serde(rename = "scrapeInterval", default = "default_scrape_interval")]
    pub scrape_interval_ms: u64,

    /// Minimum spacing between runs in milliseconds.
    #[serde(rename = "timeBetweenRuns", default = "default_time_between_runs")]
    pub time_between_runs_ms: u64,

    pub bulletin_board: BulletinBoard,
}

fn default_scrape_interval() -> u64 {
    5_000
}

fn default_time_between_runs() -> u64 {
    DEFAULT_TIME_BETWEEN_RUNS_MS
}

impl Default for Config {
    fn default() -> Self {
        Config {
            min_clients: 2,
            min_relays: 6,
            server_load: 4,
            d: 2,
            l1: 3,
            l2: 2,
            tao: 0.8,
            chi: 0.0,
            delta: 1e-2,
            drop_all_onions_from_client: None,
            scrape_interval_ms: default_scrape_interval(),
            time_between_runs_ms: default_time_between_runs(),
            bulletin_board: BulletinBoard {
                host: "127.0.0.1".to_string(),
                port: 8080,
                prom_port: 9090,
            },
        }
    }
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: Self =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Total path length `l = l1 + l2 + 1`.
    pub fn path_len(&self) -> usize {
        self.l1 + self.l2 + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_relays == 0 {
            return Err(ConfigError::ValidationFailed(
                "n (minimum relays) must be greater than 0".to_string(),
            ));
        }
        if self.min_clients == 0 {
            return Err(ConfigError::ValidationFailed(
                "N (minimum clients) must be greater than 0".to_string(),
            ));
        }
        if self.l1 > 0 && self.l2 == 0 {
            return Err(ConfigError::ValidationFailed(
                "l2 must be at least 1 when l1 is nonzero".to_string(),
            ));
        }
        if self.d > self.l1 + 1 {
            return Err(ConfigError::ValidationFailed(format!(
                "d must not exceed l1 + 1 ({} > {})",
                self.d,
                self.l1 + 1
            )));
        }
        if !(0.0..=1.0).contains(&self.tao) {
            return Err(ConfigError::ValidationFailed("tao must lie in [0, 1]".to_string()));
        }
        if !(0.0..=1.0).contains(&self.chi) {
            return Err(ConfigError::ValidationFailed("chi must lie in [0, 1]".to_string()));
        }
        if !(0.0..=1.0).contains(&self.delta) {
            return Err(ConfigError::ValidationFailed("delta must lie in [0, 1]".to_string()));
        }
        Ok(())
    }
}
