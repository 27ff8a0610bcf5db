//! The directory service: registration bookkeeping, the readiness loop and
//! the run-start broadcast.
//!
//! Registration writes and readiness reads share a reader/writer lock per
//! registry. The protocol loop polls every 3 seconds; once both rosters
//! meet their minimums and the inter-run spacing has passed it regenerates
//! the scrape config, draws the checkpoint schedule and broadcasts the
//! start signal to every active node concurrently.

use rand::thread_rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core_api::{
    now_millis, ClientStartRunApi, IntentToSend, PublicNodeApi, RelayStartRunApi,
};
use crate::core_checkpoint::generate_schedule;
use crate::shutdown::ShutdownCoordinator;

use super::error::DirectoryError;
use super::persist::{self, PersistedRoster};
use super::views::Registry;

/// Readiness poll period.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct Directory {
    config: Config,
    relays: RwLock<Registry>,
    clients: RwLock<Registry>,
    intents: RwLock<HashMap<u32, IntentToSend>>,
    http: reqwest::Client,
    roster_path: PathBuf,
    prometheus_path: PathBuf,
    last_start: Mutex<Option<Instant>>,
}

impl Directory {
    pub fn new(config: Config, data_dir: &Path) -> Arc<Self> {
        Arc::new(Directory {
            config,
            relays: RwLock::new(Registry::default()),
            clients: RwLock::new(Registry::default()),
            intents: RwLock::new(HashMap::new()),
            http: crate::core_relay::transport::default_http_client(),
            roster_path: data_dir.join("lastRegisteredClientsRelays.yml"),
            prometheus_path: data_dir.join("prometheus.yml"),
            last_start: Mutex::new(None),
        })
    }

    pub async fn update_relay(&self, node: PublicNodeApi) {
        self.relays.write().await.upsert(node);
    }

    pub async fn register_client(&self, node: PublicNodeApi) {
        self.clients.write().await.upsert(node);
    }

    pub async fn register_intent(&self, intent: IntentToSend) {
        self.intents.write().await.insert(intent.from.id, intent);
    }

    /// Heartbeat handler: refresh whichever registry knows the node;
    /// unknown ids are treated as relays, matching first-contact updates.
    pub async fn update_node(&self, node: PublicNodeApi) {
        if self.clients.read().await.contains(node.id) {
            self.clients.write().await.upsert(node);
        } else {
            self.relays.write().await.upsert(node);
        }
    }

    pub async fn active_relays(&self) -> Vec<PublicNodeApi> {
        self.relays.read().await.active(Instant::now())
    }

    /// Both rosters meet their configured minimums.
    pub async fn all_ready(&self) -> bool {
        let now = Instant::now();
        let active_relays = self.relays.read().await.active_count(now);
        if active_relays < self.config.min_relays {
            info!(
                registered = active_relays,
                needed = self.config.min_relays,
                "waiting for relays"
            );
            return false;
        }
        let active_clients = self.clients.read().await.active_count(now);
        if active_clients < self.config.min_clients {
            info!(
                registered = active_clients,
                needed = self.config.min_clients,
                "waiting for clients"
            );
            return false;
        }
        info!(relays = active_relays, clients = active_clients, "all nodes ready");
        true
    }

    /// Re-prompt nodes from the persisted roster to register again.
    pub async fn prompt_registered_nodes(&self) {
        let roster = match persist::read_roster(&self.roster_path) {
            Ok(roster) => roster,
            Err(e) => {
                warn!(error = %e, "no persisted roster to re-prompt");
                return;
            }
        };
        let mut prompted = 0usize;
        for node in roster.clients.iter().chain(roster.relays.iter()) {
            let url = format!("http://{}:{}/register", node.host, node.port);
            match self.http.post(&url).send().await {
                Ok(_) => prompted += 1,
                Err(e) => warn!(url, error = %e, "failed to prompt node to register"),
            }
        }
        info!(prompted, "prompted persisted nodes to register");
    }

    /// The directory's main loop; runs until shutdown.
    pub async fn run_protocol_loop(self: Arc<Self>, shutdown: Arc<ShutdownCoordinator>) {
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown_rx.recv() => {
                    info!("protocol loop stopped");
                    return;
                }
            }

            if !self.spacing_elapsed().await || !self.all_ready().await {
                continue;
            }

            match self.signal_start().await {
                Ok(()) => {
                    *self.last_start.lock().await = Some(Instant::now());
                }
                Err(e @ DirectoryError::MetricsRestart(_)) => {
                    // Fatal for this run: abort the start, retry after the
                    // inter-run spacing.
                    error!(error = %e, "aborting run start");
                    *self.last_start.lock().await = Some(Instant::now());
                }
                Err(e) => warn!(error = %e, "run start incomplete"),
            }
        }
    }

    async fn spacing_elapsed(&self) -> bool {
        let spacing = Duration::from_millis(self.config.time_between_runs_ms);
        match *self.last_start.lock().await {
            Some(last) => last.elapsed() >= spacing,
            None => true,
        }
    }

    /// Broadcast one run start to every active node.
    pub async fn signal_start(&self) -> Result<(), DirectoryError> {
        let now = Instant::now();
        let relays = self.relays.read().await.active(now);
        let clients = self.clients.read().await.active(now);
        let start_of_run = now_millis();

        // The scrape config must be in place before anyone starts emitting.
        persist::write_prometheus_config(
            &self.prometheus_path,
            self.config.scrape_interval_ms,
            &relays,
            &clients,
        )?;

        let schedule = generate_schedule(&relays, &clients, &self.config, &mut thread_rng());

        info!(
            relays = relays.len(),
            clients = clients.len(),
            start_of_run,
            "signaling nodes to start"
        );

        let mut join_set: JoinSet<bool> = JoinSet::new();
        for relay in &relays {
            let body = RelayStartRunApi {
                checkpoints: schedule.relay_checkpoints.get(&relay.id).cloned().unwrap_or_default(),
                config: self.config.clone(),
                start_of_run,
            };
            join_set.spawn(post_start(self.http.clone(), relay.address.clone(), body));
        }
        for client in &clients {
            let body = ClientStartRunApi {
                clients: clients.clone(),
                relays: relays.clone(),
                checkpoint_onions: schedule
                    .client_onions
                    .get(&client.id)
                    .cloned()
                    .unwrap_or_default(),
                config: self.config.clone(),
                start_of_run,
            };
            join_set.spawn(post_start(self.http.clone(), client.address.clone(), body));
        }

        // One completion per spawned signal task, counted exactly once.
        let mut reached = 0usize;
        let mut missed = 0usize;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(true) => reached += 1,
                Ok(false) => missed += 1,
                Err(e) => {
                    warn!(error = %e, "start-signal task failed");
                    missed += 1;
                }
            }
        }
        info!(reached, missed, "run start broadcast complete");

        let roster = PersistedRoster {
            clients: clients.iter().map(Into::into).collect(),
            relays: relays.iter().map(Into::into).collect(),
        };
        if let Err(e) = persist::write_roster(&self.roster_path, &roster) {
            warn!(error = %e, "failed to persist roster");
        }

        Ok(())
    }
}

/// POST a start body to one node; the run proceeds with whoever answered.
async fn post_start<B: serde::Serialize>(http: reqwest::Client, address: String, body: B) -> bool {
    let url = format!("{}/start", address.trim_end_matches('/'));
    match http.post(&url).json(&body).send().await {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            warn!(url, status = %response.status(), "node refused start signal");
            false
        }
        Err(e) => {
            debug!(url, error = %e, "node unreachable for start signal");
            false
        }
    }
}
