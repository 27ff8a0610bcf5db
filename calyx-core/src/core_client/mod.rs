//! The sending client: run participation and terminal delivery.
//!
//! On a start signal the client forms its payload onions (fixed-length
//! messages to a randomly chosen partner client over a random relay path)
//! plus the decoy onions the directory assigned to it, and fires everything
//! at the first hops concurrently. Terminal deliveries arrive on its own
//! `/receive`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core_api::{now_millis, ClientStartRunApi, OnionApi, PublicNodeApi};
use crate::core_crypto::keys::public_key_from_base64;
use crate::core_crypto::Keypair;
use crate::core_onion::form::{form_onion, OnionPath, PathHop};
use crate::core_onion::{peel_onion, unpad_message, Onion, OnionError, Role};
use crate::core_relay::transport::{HttpSender, OnionSender};
use crate::core_relay::DirectoryClient;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;

/// An onion ready to leave this client.
pub struct OutboundOnion {
    pub first_hop: String,
    pub onion: Onion,
}

pub struct Client {
    id: u32,
    address: String,
    keypair: Keypair,
    pub directory: Arc<DirectoryClient>,
    sender: Arc<dyn OnionSender>,
    metrics_handle: PrometheusHandle,
}

impl Client {
    pub fn new(
        id: u32,
        host: String,
        port: u16,
        prometheus_port: u16,
        config: &Config,
        metrics_handle: PrometheusHandle,
    ) -> Arc<Self> {
        let keypair = Keypair::generate();
        let public_key = keypair.public_base64();
        let address = format!("http://{host}:{port}");
        let http = crate::core_relay::transport::default_http_client();

        let directory = Arc::new(DirectoryClient::new(
            config.bulletin_board.url(),
            http.clone(),
            id,
            address.clone(),
            host,
            port,
            prometheus_port,
            public_key,
        ));

        Arc::new(Client {
            id,
            address,
            keypair,
            directory,
            sender: Arc::new(HttpSender::new(http)),
            metrics_handle,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Form and launch this run's onions.
    pub async fn start_run(self: Arc<Self>, start: ClientStartRunApi) {
        metrics::record_run_start(start.start_of_run);

        let mut outbound = self.build_payload_onions(&start, &mut rand::thread_rng());
        outbound.extend(self.build_checkpoint_onions(&start));
        info!(count = outbound.len(), "launching onions for this run");

        for out in outbound {
            let client = Arc::clone(&self);
            tokio::spawn(async move {
                let sent_at = now_millis();
                let body = OnionApi {
                    onion: out.onion,
                    from: client.address.clone(),
                    last_sent_timestamp: sent_at,
                    originally_sent_timestamp: sent_at,
                };
                if let Err(e) = client.sender.send(&out.first_hop, body).await {
                    warn!(to = %out.first_hop, error = %e, "onion launch failed");
                    metrics::record_onion_dropped("transport");
                }
            });
        }
    }

    /// The `x` payload onions: random partner, random relay path.
    pub fn build_payload_onions<R: Rng>(
        &self,
        start: &ClientStartRunApi,
        rng: &mut R,
    ) -> Vec<OutboundOnion> {
        let config = &start.config;
        let partners: Vec<&PublicNodeApi> =
            start.clients.iter().filter(|c| c.id != self.id).collect();

        let mut outbound = Vec::with_capacity(config.server_load);
        for i in 0..config.server_load {
            let Some(partner) = partners.choose(rng).copied().or(start.clients.first()) else {
                warn!("no recipient available for payload onions");
                break;
            };
            let Some(path) = random_path(&start.relays, partner, config, rng) else {
                warn!("relay roster too thin to build a path");
                break;
            };
            let message = format!("message {} from client {}", i, self.id);
            let nonces = vec![None; path.len()];
            match form_onion(&message, &path, config.d, &nonces) {
                Ok(mut onions) => outbound.push(OutboundOnion {
                    first_hop: path.entry_address().to_string(),
                    onion: onions.remove(0),
                }),
                Err(e) => warn!(error = %e, "failed to form payload onion"),
            }
        }
        outbound
    }

    /// The decoy onions the directory assigned: one checkpoint per hop.
    pub fn build_checkpoint_onions(&self, start: &ClientStartRunApi) -> Vec<OutboundOnion> {
        let config = &start.config;
        let mut outbound = Vec::with_capacity(start.checkpoint_onions.len());

        'next_onion: for assignment in &start.checkpoint_onions {
            if assignment.path.len() != config.path_len() {
                warn!(
                    got = assignment.path.len(),
                    expected = config.path_len(),
                    "skipping malformed checkpoint assignment"
                );
                continue;
            }
            let mut hops = Vec::with_capacity(assignment.path.len());
            for checkpoint in &assignment.path {
                match path_hop(&checkpoint.receiver) {
                    Some(hop) => hops.push(hop),
                    None => {
                        warn!(relay = checkpoint.receiver.id, "bad relay key in assignment");
                        continue 'next_onion;
                    }
                }
            }
            let recipient = hops.pop().expect("path length checked above");
            let gatekeepers = hops.split_off(config.l1);
            let path = OnionPath { mixers: hops, gatekeepers, recipient };
            let nonces: Vec<Option<String>> =
                assignment.path.iter().map(|c| Some(c.nonce.clone())).collect();

            match form_onion("", &path, config.d, &nonces) {
                Ok(mut onions) => outbound.push(OutboundOnion {
                    first_hop: path.entry_address().to_string(),
                    onion: onions.remove(0),
                }),
                Err(e) => warn!(error = %e, "failed to form checkpoint onion"),
            }
        }
        outbound
    }

    /// Terminal delivery: peel the last layer and record the latency.
    pub fn receive(&self, api: OnionApi) -> Result<(), OnionError> {
        let peeled = peel_onion(&api.onion, self.keypair.secret())?;
        if peeled.role != Role::Recipient {
            return Err(OnionError::Malformed("relay-layer onion sent to a client".to_string()));
        }
        let latency = now_millis() - api.originally_sent_timestamp;
        metrics::record_delivery(latency);
        debug!(
            from = %api.from,
            latency_ms = latency,
            message = %unpad_message(&peeled.onion.content),
            "message delivered"
        );
        Ok(())
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/start", post(handle_start))
            .route("/receive", post(handle_receive))
            .route("/register", post(handle_register))
            .route("/metrics", get(handle_metrics))
            .with_state(self)
    }

    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "client listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .await
    }
}

fn path_hop(node: &PublicNodeApi) -> Option<PathHop> {
    let public_key = public_key_from_base64(&node.public_key).ok()?;
    Some(PathHop { address: node.address.clone(), public_key })
}

/// `l1` mixers and `l2` gatekeepers drawn uniformly from the relay roster,
/// ending at `recipient`.
fn random_path<R: Rng>(
    relays: &[PublicNodeApi],
    recipient: &PublicNodeApi,
    config: &Config,
    rng: &mut R,
) -> Option<OnionPath> {
    if relays.is_empty() && (config.l1 > 0 || config.l2 > 0) {
        return None;
    }
    let draw = |rng: &mut R| path_hop(relays.choose(rng)?);
    let mut mixers = Vec::with_capacity(config.l1);
    for _ in 0..config.l1 {
        mixers.push(draw(rng)?);
    }
    let mut gatekeepers = Vec::with_capacity(config.l2);
    for _ in 0..config.l2 {
        gatekeepers.push(draw(rng)?);
    }
    Some(OnionPath { mixers, gatekeepers, recipient: path_hop(recipient)? })
}

async fn handle_start(
    State(client): State<Arc<Client>>,
    Json(body): Json<ClientStartRunApi>,
) -> StatusCode {
    client.start_run(body).await;
    StatusCode::OK
}

async fn handle_receive(State(client): State<Arc<Client>>, Json(body): Json<OnionApi>) -> StatusCode {
    match client.receive(body) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            debug!(error = %e, "dropping undeliverable onion");
            metrics::record_onion_dropped(e.counter_label());
            StatusCode::BAD_REQUEST
        }
    }
}

async fn handle_register(State(client): State<Arc<Client>>) -> StatusCode {
    let directory = Arc::clone(&client.directory);
    tokio::spawn(async move {
        if let Err(e) = directory.register_client().await {
            error!(error = %e, "re-registration with directory failed");
        }
    });
    StatusCode::OK
}

async fn handle_metrics(State(client): State<Arc<Client>>) -> String {
    client.metrics_handle.render()
}

#[cfg(test)]
pub mod tests;
