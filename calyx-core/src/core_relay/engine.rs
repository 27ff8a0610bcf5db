//! The forwarding engine: per-layer batching, checkpoint accounting and
//! threshold-triggered release.
//!
//! One run's state lives behind a single lock. Inbound handlers tally
//! checkpoints and append to the layer queue under the write half; the
//! late-arrival check reads `current_layer` under the read half. A layer's
//! queue flushes as one batch once enough expected checkpoints arrived,
//! which is what mixes honest and decoy traffic within the layer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core_api::{now_millis, OnionApi, RelayStartRunApi};
use crate::core_crypto::Keypair;
use crate::core_onion::{peel_onion, Onion, OnionError, Role};
use crate::metrics;

use super::corruption::{corrupted_relay_ids, CORRUPTION_SEED};
use super::transport::OnionSender;

/// Receive-path failures. Everything here resolves to "drop the onion";
/// nothing is reported back to the peer beyond a status code.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Onion(#[from] OnionError),
    #[error("run has not started")]
    NotStarted,
}

/// An onion held for its layer's release.
#[derive(Debug, Clone)]
struct QueuedOnion {
    onion: Onion,
    next_hop: String,
    layer: usize,
    originally_sent: i64,
    received_at: Instant,
}

/// Per-run state, reset by every start signal.
struct RunState {
    expected_nonces: HashMap<usize, HashSet<String>>,
    expected_count: HashMap<usize, usize>,
    received_count: HashMap<usize, usize>,
    queues: HashMap<usize, Vec<QueuedOnion>>,
    current_layer: usize,
    corrupted: bool,
    drop_from_address: Option<String>,
    tao: f64,
}

impl RunState {
    fn threshold(&self, layer: usize) -> usize {
        let expected = self.expected_count.get(&layer).copied().unwrap_or(0);
        (self.tao * expected as f64).ceil() as usize
    }

    fn received(&self, layer: usize) -> usize {
        self.received_count.get(&layer).copied().unwrap_or(0)
    }
}

/// The relay's forwarding engine.
pub struct RelayEngine {
    id: u32,
    address: String,
    keypair: Keypair,
    sender: Arc<dyn OnionSender>,
    state: RwLock<Option<RunState>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl RelayEngine {
    pub fn new(id: u32, address: String, keypair: Keypair, sender: Arc<dyn OnionSender>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        RelayEngine {
            id,
            address,
            keypair,
            sender,
            state: RwLock::new(None),
            ready_tx,
            ready_rx,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Install a run: reset all per-run state, record the expected nonces,
    /// and open the readiness latch so `/receive` handlers proceed.
    pub async fn start_run(&self, start: RelayStartRunApi) {
        let config = &start.config;
        let corrupted = self.pick_corruption(config);
        let drop_from_address = if corrupted {
            config.drop_all_onions_from_client.clone()
        } else {
            None
        };

        let mut expected_nonces: HashMap<usize, HashSet<String>> = HashMap::new();
        let mut expected_count: HashMap<usize, usize> = HashMap::new();
        for checkpoint in &start.checkpoints {
            expected_nonces
                .entry(checkpoint.layer)
                .or_default()
                .insert(checkpoint.nonce.clone());
            *expected_count.entry(checkpoint.layer).or_insert(0) += 1;
        }

        info!(
            relay = self.id,
            expected = start.checkpoints.len(),
            corrupted,
            start_of_run = start.start_of_run,
            "run installed"
        );
        metrics::record_run_start(start.start_of_run);

        *self.state.write().await = Some(RunState {
            expected_nonces,
            expected_count,
            received_count: HashMap::new(),
            queues: HashMap::new(),
            current_layer: 0,
            corrupted,
            drop_from_address,
            tao: start.config.tao,
        });

        // One-shot latch: receives wait only for the first installed run.
        let _ = self.ready_tx.send(true);
    }

    fn pick_corruption(&self, config: &Config) -> bool {
        if config.chi <= 0.0 {
            return false;
        }
        let num_relays = config.min_relays.max(self.id as usize);
        corrupted_relay_ids(num_relays, config.chi, CORRUPTION_SEED).contains(&self.id)
    }

    async fn await_ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Process one inbound onion end to end: peel, tally, queue or forward.
    pub async fn receive(&self, api: OnionApi, received_at: Instant) -> Result<(), RelayError> {
        self.await_ready().await;

        let mut peeled = peel_onion(&api.onion, self.keypair.secret())?;
        let layer = peeled.layer;

        metrics::record_onion_received(layer);
        metrics::record_hop_latency(layer, now_millis() - api.last_sent_timestamp);

        {
            let state = self.state.read().await;
            let state = state.as_ref().ok_or(RelayError::NotStarted)?;
            if state.corrupted && state.drop_from_address.as_deref() == Some(api.from.as_str()) {
                debug!(from = %api.from, "corrupted relay dropping onion");
                metrics::record_onion_dropped("corrupted");
                return Ok(());
            }
        }

        let is_checkpoint = peeled.nonce.is_some();
        let mut verified = false;
        {
            let mut state = self.state.write().await;
            let state = state.as_mut().ok_or(RelayError::NotStarted)?;
            match &peeled.nonce {
                Some(nonce) => {
                    if state
                        .expected_nonces
                        .get(&layer)
                        .is_some_and(|nonces| nonces.contains(nonce))
                    {
                        *state.received_count.entry(layer).or_insert(0) += 1;
                        verified = true;
                        metrics::record_checkpoint(layer);
                        if peeled.role == Role::Mixer {
                            peeled.onion.sepal.drop_block();
                        }
                    } else if peeled.role == Role::Mixer {
                        // An unverifiable nonce is treated as tampering.
                        peeled.onion.sepal.add_bruise();
                    }
                }
                None => {
                    if peeled.role == Role::Mixer {
                        peeled.onion.sepal.drop_block();
                    }
                }
            }
        }

        debug!(
            layer,
            role = ?peeled.role,
            is_checkpoint,
            verified,
            next_hop = peeled.next_hop.as_deref().unwrap_or("-"),
            "peeled onion"
        );

        // Terminal hop of a decoy: the tally above was the whole point.
        let Some(next_hop) = peeled.next_hop.clone() else {
            return Ok(());
        };

        let queued = QueuedOnion {
            onion: peeled.onion,
            next_hop,
            layer,
            originally_sent: api.originally_sent_timestamp,
            received_at,
        };

        // Late bypass: holding an onion for an already-released layer buys
        // no anonymity and costs latency.
        {
            let state = self.state.read().await;
            let state = state.as_ref().ok_or(RelayError::NotStarted)?;
            if layer < state.current_layer {
                self.spawn_send(queued);
                return Ok(());
            }
        }

        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(RelayError::NotStarted)?;
        // The release may have advanced between the two lock holds.
        if layer < state.current_layer {
            drop(guard);
            self.spawn_send(queued);
            return Ok(());
        }

        state.queues.entry(layer).or_default().push(queued);
        if state.received(layer) >= state.threshold(layer) {
            let batch = state.queues.insert(layer, Vec::new()).unwrap_or_default();
            state.current_layer = state.current_layer.max(layer);
            info!(layer, count = batch.len(), "releasing layer queue");
            drop(guard);
            for queued in batch {
                self.spawn_send(queued);
            }
        }

        Ok(())
    }

    /// Hand a queued onion off by value to an independent send task.
    fn spawn_send(&self, queued: QueuedOnion) {
        let sender = Arc::clone(&self.sender);
        let from = self.address.clone();
        tokio::spawn(async move {
            send_onion(sender, from, queued).await;
        });
    }
}

async fn send_onion(sender: Arc<dyn OnionSender>, from: String, queued: QueuedOnion) {
    metrics::record_onion_forwarded(queued.layer);
    metrics::record_processing_time(queued.received_at.elapsed().as_secs_f64() * 1000.0);

    let body = OnionApi {
        onion: queued.onion,
        from,
        last_sent_timestamp: now_millis(),
        originally_sent_timestamp: queued.originally_sent,
    };
    if let Err(e) = sender.send(&queued.next_hop, body).await {
        warn!(layer = queued.layer, error = %e, "onion send failed, dropping");
        metrics::record_onion_dropped("transport");
    }
}

