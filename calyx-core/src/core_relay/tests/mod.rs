//! Forwarding-engine tests: threshold release, late bypass, at-most-once
//! emission, corrupted-relay drops. Real onions, recorded sends.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::core_api::{now_millis, Checkpoint, OnionApi, PublicNodeApi, RelayStartRunApi};
use crate::core_crypto::Keypair;
use crate::core_onion::form::{form_onion, OnionPath, PathHop};
use crate::core_onion::Onion;
use crate::core_relay::engine::RelayEngine;
use crate::core_relay::transport::{OnionSender, TransportError};

/// Records every send instead of touching the network.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, OnionApi)>>,
}

#[async_trait]
impl OnionSender for RecordingSender {
    async fn send(&self, to: &str, body: OnionApi) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((to.to_string(), body));
        Ok(())
    }
}

impl RecordingSender {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn sent(&self) -> Vec<(String, OnionApi)> {
        self.sent.lock().unwrap().clone()
    }
}

/// Sends are spawned tasks; give them a moment to drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

fn stub_node(id: u32) -> PublicNodeApi {
    PublicNodeApi {
        id,
        address: format!("http://relay-{id}:8100"),
        host: format!("relay-{id}"),
        port: 8100,
        public_key: String::new(),
        prometheus_port: 9100,
        time: 0,
    }
}

struct Rig {
    engine: Arc<RelayEngine>,
    sender: Arc<RecordingSender>,
}

fn rig() -> Rig {
    let sender = Arc::new(RecordingSender::default());
    let engine = Arc::new(RelayEngine::new(
        1,
        "http://relay-1:8100".to_string(),
        Keypair::generate(),
        Arc::clone(&sender) as Arc<dyn OnionSender>,
    ));
    Rig { engine, sender }
}

impl Rig {
    /// Build a `l1 = 2, l2 = 1` path whose hop `position` (1-based) is this
    /// engine, and return the onion arriving at that hop plus the honest
    /// expectation for the hop after it.
    fn onion_with_expected(&self, position: usize, nonce: Option<String>) -> (Onion, Onion) {
        let l1 = 2;
        let l2 = 1;
        let pairs: Vec<Keypair> = (0..l1 + l2 + 1).map(|_| Keypair::generate()).collect();
        let hop = |i: usize| {
            let public_key = if i == position - 1 {
                *self.engine.keypair().public()
            } else {
                *pairs[i].public()
            };
            PathHop { address: format!("http://hop-{i}:8100"), public_key }
        };
        let path = OnionPath {
            mixers: (0..l1).map(&hop).collect(),
            gatekeepers: (0..l2).map(|i| hop(l1 + i)).collect(),
            recipient: hop(l1 + l2),
        };
        let mut nonces = vec![None; l1 + l2 + 1];
        nonces[position - 1] = nonce;
        let mut onions = form_onion("engine test", &path, 1, &nonces).unwrap();
        let expected_next = onions.remove(position);
        let arriving = onions.remove(position - 1);
        (arriving, expected_next)
    }

    fn onion_at(&self, position: usize, nonce: Option<String>) -> Onion {
        self.onion_with_expected(position, nonce).0
    }

    async fn start(&self, checkpoints: Vec<Checkpoint>, config: Config) {
        self.engine
            .start_run(RelayStartRunApi { checkpoints, config, start_of_run: now_millis() })
            .await;
    }

    async fn feed(&self, onion: Onion, from: &str) {
        let api = OnionApi {
            onion,
            from: from.to_string(),
            last_sent_timestamp: now_millis(),
            originally_sent_timestamp: now_millis(),
        };
        self.engine.receive(api, Instant::now()).await.unwrap();
    }
}

fn checkpoint(layer: usize, nonce: &str) -> Checkpoint {
    Checkpoint { receiver: stub_node(1), nonce: nonce.to_string(), layer }
}

#[tokio::test]
async fn payload_held_until_checkpoint_threshold() {
    // expected_count[1] = 10, tao = 0.6: release on the 6th verified nonce.
    let rig = rig();
    let nonces: Vec<String> = (0..10).map(|i| format!("nonce-{i}")).collect();
    let checkpoints = nonces.iter().map(|n| checkpoint(1, n)).collect();
    let config = Config { tao: 0.6, ..Config::default() };
    rig.start(checkpoints, config).await;

    let payload = rig.onion_at(1, None);
    rig.feed(payload, "http://client-a").await;

    for nonce in nonces.iter().take(5) {
        let onion = rig.onion_at(1, Some(nonce.clone()));
        rig.feed(onion, "http://client-a").await;
    }
    settle().await;
    assert_eq!(rig.sender.count(), 0, "queue must hold below the threshold");

    let sixth = rig.onion_at(1, Some(nonces[5].clone()));
    rig.feed(sixth, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 7, "the whole layer flushes on the 6th checkpoint");
}

#[tokio::test]
async fn zero_threshold_releases_immediately() {
    let rig = rig();
    rig.start(vec![checkpoint(1, "unused")], Config { tao: 0.0, ..Config::default() }).await;

    let payload = rig.onion_at(1, None);
    rig.feed(payload, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 1);
}

#[tokio::test]
async fn late_onion_bypasses_its_queue() {
    // tao = 1 with one expected checkpoint per layer: layer 2 releases when
    // its nonce lands, then a layer-1 arrival is late and forwards at once.
    let rig = rig();
    let checkpoints = vec![checkpoint(1, "layer-one"), checkpoint(2, "layer-two")];
    rig.start(checkpoints, Config { tao: 1.0, ..Config::default() }).await;

    let layer_two = rig.onion_at(2, Some("layer-two".to_string()));
    rig.feed(layer_two, "http://hop-0:8100").await;
    settle().await;
    assert_eq!(rig.sender.count(), 1, "layer 2 met its threshold");

    let layer_one = rig.onion_at(1, None);
    rig.feed(layer_one, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 2, "late layer-1 onion forwards without queueing");
}

#[tokio::test]
async fn queued_onions_are_sent_exactly_once() {
    let rig = rig();
    let checkpoints = vec![checkpoint(1, "n-1"), checkpoint(1, "n-2")];
    rig.start(checkpoints, Config { tao: 0.5, ..Config::default() }).await;

    // threshold = ceil(0.5 * 2) = 1: first verified nonce flushes.
    let payload = rig.onion_at(1, None);
    rig.feed(payload, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 0);

    let first = rig.onion_at(1, Some("n-1".to_string()));
    rig.feed(first, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 2);

    // A second verified nonce must not re-emit the already-flushed batch.
    let second = rig.onion_at(1, Some("n-2".to_string()));
    rig.feed(second, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 3);

    let mut stamps: Vec<i64> =
        rig.sender.sent().iter().map(|(_, api)| api.originally_sent_timestamp).collect();
    let before = stamps.len();
    stamps.dedup();
    assert_eq!(stamps.len(), before, "no onion may be emitted twice");
}

#[tokio::test]
async fn corrupted_relay_drops_the_marked_client_only() {
    let rig = rig();
    let config = Config {
        tao: 0.0,
        chi: 1.0,
        min_relays: 1,
        drop_all_onions_from_client: Some("http://client-a".to_string()),
        ..Config::default()
    };
    rig.start(Vec::new(), config).await;

    let marked = rig.onion_at(1, None);
    rig.feed(marked, "http://client-a").await;
    settle().await;
    assert_eq!(rig.sender.count(), 0, "marked client's onions are dropped");

    let unmarked = rig.onion_at(1, None);
    rig.feed(unmarked, "http://client-b").await;
    settle().await;
    assert_eq!(rig.sender.count(), 1, "other clients pass through");
}

#[tokio::test]
async fn verified_checkpoint_drops_unverified_bruises() {
    let rig = rig();
    let checkpoints = vec![checkpoint(1, "known")];
    rig.start(checkpoints, Config { tao: 0.0, ..Config::default() }).await;

    let (verified, expected_next) = rig.onion_with_expected(1, Some("known".to_string()));
    rig.feed(verified, "http://client-a").await;
    settle().await;
    let sent = rig.sender.sent();
    assert_eq!(sent.len(), 1);
    // A verified nonce means an honest drop: hop 2 sees exactly the sepal
    // the sender simulated for the all-honest run.
    assert_eq!(sent[0].1.onion.sepal.blocks, expected_next.sepal.blocks);

    let (unverified, expected_next) = rig.onion_with_expected(1, Some("unknown".to_string()));
    rig.feed(unverified, "http://client-a").await;
    settle().await;
    let sent = rig.sender.sent();
    assert_eq!(sent.len(), 2);
    // A bruise shrinks by one as well, but removes the head key-block, so
    // the surviving blocks differ from the honest expectation.
    assert_eq!(sent[1].1.onion.sepal.len(), expected_next.sepal.len());
    assert_ne!(sent[1].1.onion.sepal.blocks, expected_next.sepal.blocks);
}

#[tokio::test]
async fn receives_block_until_the_first_run_is_installed() {
    let rig = rig();
    let onion = rig.onion_at(1, None);
    let api = OnionApi {
        onion,
        from: "http://client-a".to_string(),
        last_sent_timestamp: now_millis(),
        originally_sent_timestamp: now_millis(),
    };

    let engine = Arc::clone(&rig.engine);
    let pending = tokio::spawn(async move { engine.receive(api, Instant::now()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished(), "receive must wait for the readiness latch");

    rig.start(Vec::new(), Config { tao: 0.0, ..Config::default() }).await;
    tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("receive must unblock after start")
        .unwrap()
        .unwrap();
    settle().await;
    assert_eq!(rig.sender.count(), 1);
}
