//! JSON wire structs shared by the directory, relays and clients.
//!
//! Field names are the protocol's camelCase contract; everything here is a
//! plain body for an axum extractor on one side and a reqwest POST on the
//! other.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::core_onion::Onion;

/// Public identity of a node as registered with the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicNodeApi {
    pub id: u32,
    pub address: String,
    pub host: String,
    pub port: u16,
    pub public_key: String,
    pub prometheus_port: u16,
    pub time: i64,
}

/// One onion in flight between two hops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnionApi {
    pub onion: Onion,
    pub from: String,
    pub last_sent_timestamp: i64,
    pub originally_sent_timestamp: i64,
}

/// A checkpoint assignment: `receiver` expects `nonce` at `layer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub receiver: PublicNodeApi,
    pub nonce: String,
    pub layer: usize,
}

/// A full decoy onion assignment for one client: one checkpoint per hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointOnion {
    pub path: Vec<Checkpoint>,
}

/// Start signal for a relay: the nonces it should expect, keyed by layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStartRunApi {
    pub checkpoints: Vec<Checkpoint>,
    pub config: Config,
    pub start_of_run: i64,
}

/// Start signal for a client: rosters plus its decoy assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStartRunApi {
    pub clients: Vec<PublicNodeApi>,
    pub relays: Vec<PublicNodeApi>,
    pub checkpoint_onions: Vec<CheckpointOnion>,
    pub config: Config,
    pub start_of_run: i64,
}

/// A client announcing whom it intends to message in the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentToSend {
    pub from: PublicNodeApi,
    pub to: Vec<PublicNodeApi>,
    pub time: i64,
}

/// Unix-epoch milliseconds, the timestamp unit of every API body.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
