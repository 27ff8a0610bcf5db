//! Persisted directory state: the last-registered roster and the generated
//! Prometheus scrape configuration. Both are YAML and both are written
//! atomically (tmp file + rename) so a crash never leaves a torn file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core_api::PublicNodeApi;

use super::error::DirectoryError;

/// Where a persisted node can be reached again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
    pub host: String,
    pub port: u16,
    #[serde(rename = "promPort")]
    pub prom_port: u16,
}

impl From<&PublicNodeApi> for PersistedNode {
    fn from(node: &PublicNodeApi) -> Self {
        PersistedNode { host: node.host.clone(), port: node.port, prom_port: node.prometheus_port }
    }
}

/// `lastRegisteredClientsRelays.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedRoster {
    pub clients: Vec<PersistedNode>,
    pub relays: Vec<PersistedNode>,
}

pub fn write_roster(path: &Path, roster: &PersistedRoster) -> Result<(), DirectoryError> {
    let yaml = serde_yaml::to_string(roster)
        .map_err(|e| DirectoryError::Persist(e.to_string()))?;
    write_atomically(path, &yaml).map_err(|e| DirectoryError::Persist(e.to_string()))
}

pub fn read_roster(path: &Path) -> Result<PersistedRoster, DirectoryError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| DirectoryError::Persist(e.to_string()))?;
    serde_yaml::from_str(&contents).map_err(|e| DirectoryError::Persist(e.to_string()))
}

// Prometheus scrape configuration, matching the file format Prometheus
// itself reads.

#[derive(Debug, Serialize, Deserialize)]
struct PromGlobal {
    scrape_interval: String,
    external_labels: PromLabels,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromLabels {
    monitor: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromStaticConfig {
    targets: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromScrapeConfig {
    job_name: String,
    scrape_interval: String,
    static_configs: Vec<PromStaticConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromConfig {
    global: PromGlobal,
    scrape_configs: Vec<PromScrapeConfig>,
}

/// Regenerate `prometheus.yml` with one scrape job per active node. A
/// failure here is fatal for the current run: the caller aborts the start
/// and retries after the inter-run spacing.
pub fn write_prometheus_config(
    path: &Path,
    scrape_interval_ms: u64,
    relays: &[PublicNodeApi],
    clients: &[PublicNodeApi],
) -> Result<(), DirectoryError> {
    let interval = format!("{}ms", scrape_interval_ms);
    let job = |name: String, node: &PublicNodeApi| PromScrapeConfig {
        job_name: name,
        scrape_interval: interval.clone(),
        static_configs: vec![PromStaticConfig {
            targets: vec![format!("{}:{}", node.host, node.prometheus_port)],
        }],
    };

    let mut scrape_configs = Vec::with_capacity(relays.len() + clients.len());
    for client in clients {
        scrape_configs.push(job(format!("client-{}", client.id), client));
    }
    for relay in relays {
        scrape_configs.push(job(format!("relay-{}", relay.id), relay));
    }

    let config = PromConfig {
        global: PromGlobal {
            scrape_interval: interval.clone(),
            external_labels: PromLabels { monitor: "calyx".to_string() },
        },
        scrape_configs,
    };

    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| DirectoryError::MetricsRestart(e.to_string()))?;
    write_atomically(path, &yaml).map_err(|e| DirectoryError::MetricsRestart(e.to_string()))
}

fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
