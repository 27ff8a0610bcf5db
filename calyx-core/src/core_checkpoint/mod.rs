//! Per-run checkpoint schedule.
//!
//! The directory draws this once per run: each client gets a Poisson number
//! of decoy onion assignments, each assignment naming one relay and one
//! fresh nonce per layer. The relay-side view (expected nonces grouped by
//! receiver) is an index over the same draw, so the two views cannot
//! disagree.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::core_api::{Checkpoint, CheckpointOnion, PublicNodeApi};

/// Both views of one run's checkpoint draw.
#[derive(Debug, Default)]
pub struct CheckpointSchedule {
    /// Per client: the decoy onions it must form and inject.
    pub client_onions: HashMap<u32, Vec<CheckpointOnion>>,
    /// Per relay: every checkpoint it is the verifier for.
    pub relay_checkpoints: HashMap<u32, Vec<Checkpoint>>,
}

/// Draw the schedule for one run. The per-client checkpoint volume is
/// Poisson with mean [`checkpoint_mean`], sized so each relay's `tao`
/// threshold stays reachable with probability at least `1 - delta` under
/// honest traffic.
pub fn generate_schedule<R: Rng>(
    relays: &[PublicNodeApi],
    clients: &[PublicNodeApi],
    config: &Config,
    rng: &mut R,
) -> CheckpointSchedule {
    let mut schedule = CheckpointSchedule::default();
    if relays.is_empty() {
        return schedule;
    }

    let mean = checkpoint_mean(relays.len(), clients.len(), config);
    let path_len = config.path_len();
    for client in clients {
        let onion_count = sample_poisson(rng, mean);
        let mut onions = Vec::with_capacity(onion_count);
        for _ in 0..onion_count {
            let path: Vec<Checkpoint> = (1..=path_len)
                .map(|layer| {
                    let receiver = relays
                        .choose(rng)
                        .expect("relay roster checked non-empty above")
                        .clone();
                    Checkpoint { receiver, nonce: Uuid::new_v4().to_string(), layer }
                })
                .collect();
            for checkpoint in &path {
                schedule
                    .relay_checkpoints
                    .entry(checkpoint.receiver.id)
                    .or_default()
                    .push(checkpoint.clone());
            }
            onions.push(CheckpointOnion { path });
        }
        schedule.client_onions.insert(client.id, onions);
    }

    schedule
}

/// Per-client decoy mean: the payload load `x`, inflated when necessary so
/// the threshold is reachable with the configured confidence.
///
/// Each checkpoint onion assigns one uniformly chosen relay per layer, so a
/// relay's per-layer arrival count is Poisson with mean
/// `mu = mean * clients / relays`. The lower-tail bound
/// `Pr[N < tao * mu] <= exp(-mu * (1 - tao)^2 / 2)` stays under `delta`
/// once `mu >= 2 * ln(1/delta) / (1 - tao)^2`. At `tao = 1` no inflation
/// can help (every expected nonce must arrive), so the base load stands.
fn checkpoint_mean(relay_count: usize, client_count: usize, config: &Config) -> f64 {
    let base = config.server_load as f64;
    let slack = 1.0 - config.tao;
    if slack <= 0.0 || config.delta <= 0.0 || config.delta >= 1.0 || client_count == 0 {
        return base;
    }
    let required_per_relay = 2.0 * (1.0 / config.delta).ln() / (slack * slack);
    let required_per_client = required_per_relay * relay_count as f64 / client_count as f64;
    base.max(required_per_client)
}

/// Knuth's product method. Large means are split into independent halves
/// (their sum is Poisson again) to keep `exp(-lambda)` well away from
/// underflow.
fn sample_poisson<R: Rng>(rng: &mut R, lambda: f64) -> usize {
    if lambda <= 0.0 {
        return 0;
    }
    if lambda > 400.0 {
        return sample_poisson(rng, lambda / 2.0) + sample_poisson(rng, lambda / 2.0);
    }
    let limit = (-lambda).exp();
    let mut count = 0usize;
    let mut product: f64 = rng.gen();
    while product > limit {
        count += 1;
        product *= rng.gen::<f64>();
    }
    count
}
