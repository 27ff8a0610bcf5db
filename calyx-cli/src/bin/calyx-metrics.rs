//! The metric collector: polls every node's Prometheus endpoint.
//!
//! Targets come from the roster the directory persisted after its last
//! successful start broadcast.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use calyx_cli::CommonArgs;
use calyx_core::core_directory::read_roster;
use calyx_core::shutdown::{install_signal_handlers, ShutdownCoordinator};

#[derive(Parser, Debug)]
#[command(name = "calyx-metrics")]
#[command(about = "Calyx metric collector: scrapes every node's /metrics", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the roster the directory persisted
    #[arg(long, default_value = "lastRegisteredClientsRelays.yml")]
    roster: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.common.init_logging()?;
    let config = args.common.load_config()?;

    let roster = read_roster(&args.roster)?;
    let targets: Vec<String> = roster
        .clients
        .iter()
        .chain(roster.relays.iter())
        .map(|node| format!("http://{}:{}/metrics", node.host, node.prom_port))
        .collect();
    info!(targets = targets.len(), "metric collector started");

    let shutdown = Arc::new(ShutdownCoordinator::new());
    install_signal_handlers(Arc::clone(&shutdown));
    let mut shutdown_rx = shutdown.subscribe();

    let http = calyx_core::core_relay::transport::default_http_client();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.scrape_interval_ms));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.recv() => {
                info!("metric collector stopped");
                return Ok(());
            }
        }

        let mut scrapes: JoinSet<()> = JoinSet::new();
        for target in &targets {
            let http = http.clone();
            let target = target.clone();
            scrapes.spawn(async move {
                match http.get(&target).send().await {
                    Ok(response) if response.status().is_success() => {
                        let bytes = response.bytes().await.map(|b| b.len()).unwrap_or(0);
                        debug!(target, bytes, "scraped metrics");
                    }
                    Ok(response) => {
                        warn!(target, status = %response.status(), "unexpected scrape status");
                    }
                    Err(e) => warn!(target, error = %e, "failed to scrape metrics"),
                }
            });
        }
        while scrapes.join_next().await.is_some() {}
    }
}
