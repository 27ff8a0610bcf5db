//! Client-side tests: path assembly, decoy formation, terminal delivery.

use metrics_exporter_prometheus::PrometheusBuilder;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::core_api::{
    now_millis, Checkpoint, CheckpointOnion, ClientStartRunApi, OnionApi, PublicNodeApi,
};
use crate::core_crypto::Keypair;
use crate::core_onion::{peel_onion, unpad_message, Onion, Role};

use super::Client;

fn test_client(id: u32, port: u16, config: &Config) -> Arc<Client> {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    Client::new(id, "127.0.0.1".to_string(), port, port + 1000, config, handle)
}

/// A roster entry whose keypair we keep for peeling.
fn roster_node(id: u32, pair: &Keypair) -> PublicNodeApi {
    PublicNodeApi {
        id,
        address: format!("http://relay-{id}:8100"),
        host: format!("relay-{id}"),
        port: 8100,
        public_key: pair.public_base64(),
        prometheus_port: 9100,
        time: now_millis(),
    }
}

fn client_node(client: &Client, id: u32) -> PublicNodeApi {
    PublicNodeApi {
        id,
        address: client.address().to_string(),
        host: "127.0.0.1".to_string(),
        port: 8000,
        public_key: client.keypair().public_base64(),
        prometheus_port: 9000,
        time: now_millis(),
    }
}

struct Network {
    /// address → keypair for every relay.
    keys: HashMap<String, Keypair>,
    relays: Vec<PublicNodeApi>,
}

fn network(count: u32) -> Network {
    let mut keys = HashMap::new();
    let mut relays = Vec::new();
    for id in 1..=count {
        let pair = Keypair::generate();
        let info = roster_node(id, &pair);
        keys.insert(info.address.clone(), pair);
        relays.push(info);
    }
    Network { keys, relays }
}

/// Walk an onion through relay hops until the terminal layer, performing
/// honest mixer drops. Returns the onion addressed to the final recipient.
fn transit_to_recipient(network: &Network, first_hop: &str, onion: Onion) -> (String, Onion) {
    let mut address = first_hop.to_string();
    let mut current = onion;
    loop {
        let Some(pair) = network.keys.get(&address) else {
            // Left the relay set: the next hop is the recipient.
            return (address, current);
        };
        let mut peeled = peel_onion(&current, pair.secret()).unwrap();
        if peeled.role == Role::Mixer {
            peeled.onion.sepal.drop_block();
        }
        match peeled.next_hop {
            Some(next) => {
                address = next;
                current = peeled.onion;
            }
            None => return (address, current),
        }
    }
}

#[test]
fn payload_onions_reach_the_partner_client() {
    let config = Config { server_load: 3, l1: 2, l2: 1, d: 1, ..Config::default() };
    let sender = test_client(100, 8000, &config);
    let partner = test_client(101, 8001, &config);
    let network = network(6);

    let start = ClientStartRunApi {
        clients: vec![client_node(&sender, 100), client_node(&partner, 101)],
        relays: network.relays.clone(),
        checkpoint_onions: Vec::new(),
        config: config.clone(),
        start_of_run: now_millis(),
    };

    let mut rng = StdRng::seed_from_u64(9);
    let outbound = sender.build_payload_onions(&start, &mut rng);
    assert_eq!(outbound.len(), config.server_load);

    for out in outbound {
        assert!(network.keys.contains_key(&out.first_hop), "first hop must be a relay");
        let (final_address, terminal) = transit_to_recipient(&network, &out.first_hop, out.onion);
        assert_eq!(final_address, partner.address());

        let delivered = peel_onion(&terminal, partner.keypair().secret()).unwrap();
        assert_eq!(delivered.role, Role::Recipient);
        assert!(unpad_message(&delivered.onion.content).starts_with("message "));
    }
}

#[test]
fn checkpoint_onions_follow_their_assignment() {
    let config = Config { l1: 2, l2: 1, d: 1, ..Config::default() };
    let sender = test_client(100, 8002, &config);
    let network = network(5);

    let path: Vec<Checkpoint> = (1..=config.path_len())
        .map(|layer| Checkpoint {
            receiver: network.relays[layer % network.relays.len()].clone(),
            nonce: format!("nonce-layer-{layer}"),
            layer,
        })
        .collect();
    let start = ClientStartRunApi {
        clients: vec![client_node(&sender, 100)],
        relays: network.relays.clone(),
        checkpoint_onions: vec![CheckpointOnion { path: path.clone() }],
        config: config.clone(),
        start_of_run: now_millis(),
    };

    let outbound = sender.build_checkpoint_onions(&start);
    assert_eq!(outbound.len(), 1);
    let out = &outbound[0];
    assert_eq!(out.first_hop, path[0].receiver.address);

    // Every hop of the decoy surfaces its assigned nonce.
    let mut current = out.onion.clone();
    for (i, checkpoint) in path.iter().enumerate() {
        let pair = &network.keys[&checkpoint.receiver.address];
        let mut peeled = peel_onion(&current, pair.secret()).unwrap();
        assert_eq!(peeled.layer, i + 1);
        assert_eq!(peeled.nonce.as_deref(), Some(checkpoint.nonce.as_str()));
        if peeled.role == Role::Mixer {
            peeled.onion.sepal.drop_block();
        }
        if peeled.role == Role::Recipient {
            assert_eq!(i + 1, config.path_len());
            break;
        }
        current = peeled.onion;
    }
}

#[test]
fn malformed_assignment_is_skipped() {
    let config = Config { l1: 2, l2: 1, ..Config::default() };
    let sender = test_client(100, 8003, &config);
    let network = network(3);

    let short_path = vec![Checkpoint {
        receiver: network.relays[0].clone(),
        nonce: "n".to_string(),
        layer: 1,
    }];
    let start = ClientStartRunApi {
        clients: vec![client_node(&sender, 100)],
        relays: network.relays.clone(),
        checkpoint_onions: vec![CheckpointOnion { path: short_path }],
        config,
        start_of_run: now_millis(),
    };

    assert!(sender.build_checkpoint_onions(&start).is_empty());
}

#[test]
fn terminal_delivery_roundtrip() {
    let config = Config { server_load: 1, l1: 1, l2: 1, d: 1, ..Config::default() };
    let sender = test_client(100, 8004, &config);
    let recipient = test_client(101, 8005, &config);
    let network = network(4);

    let start = ClientStartRunApi {
        clients: vec![client_node(&sender, 100), client_node(&recipient, 101)],
        relays: network.relays.clone(),
        checkpoint_onions: Vec::new(),
        config: config.clone(),
        start_of_run: now_millis(),
    };

    let mut rng = StdRng::seed_from_u64(4);
    let out = sender.build_payload_onions(&start, &mut rng).remove(0);
    let (_, terminal) = transit_to_recipient(&network, &out.first_hop, out.onion);

    let api = OnionApi {
        onion: terminal,
        from: "http://relay-x:8100".to_string(),
        last_sent_timestamp: now_millis(),
        originally_sent_timestamp: now_millis() - 40,
    };
    recipient.receive(api).unwrap();
}

#[test]
fn relay_layer_onion_at_a_client_is_rejected() {
    let config = Config { l1: 1, l2: 1, d: 1, ..Config::default() };
    let sender = test_client(100, 8006, &config);
    let recipient = test_client(101, 8007, &config);
    let network = network(4);

    let start = ClientStartRunApi {
        clients: vec![client_node(&sender, 100), client_node(&recipient, 101)],
        relays: network.relays.clone(),
        checkpoint_onions: Vec::new(),
        config: Config { server_load: 1, ..config },
        start_of_run: now_millis(),
    };

    let mut rng = StdRng::seed_from_u64(4);
    let out = sender.build_payload_onions(&start, &mut rng).remove(0);
    // Still wrapped for the first relay, not for the recipient.
    let api = OnionApi {
        onion: out.onion,
        from: sender.address().to_string(),
        last_sent_timestamp: now_millis(),
        originally_sent_timestamp: now_millis(),
    };
    assert!(recipient.receive(api).is_err());
}
