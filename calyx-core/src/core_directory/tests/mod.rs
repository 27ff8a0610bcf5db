//! Directory behaviour: readiness counting, heartbeat routing and the
//! registration surface over a live axum server.

use std::sync::Arc;

use crate::config::Config;
use crate::core_api::{now_millis, IntentToSend, PublicNodeApi};
use crate::core_directory::board::Directory;
use crate::core_directory::server::router;

fn node(id: u32, port: u16) -> PublicNodeApi {
    PublicNodeApi {
        id,
        address: format!("http://127.0.0.1:{port}"),
        host: "127.0.0.1".to_string(),
        port,
        public_key: "cGs=".to_string(),
        prometheus_port: 9100,
        time: now_millis(),
    }
}

fn directory(config: Config) -> (Arc<Directory>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (Directory::new(config, dir.path()), dir)
}

#[tokio::test]
async fn readiness_requires_both_minimums() {
    let config = Config { min_relays: 2, min_clients: 1, ..Config::default() };
    let (directory, _guard) = directory(config);

    assert!(!directory.all_ready().await);

    directory.update_relay(node(1, 8101)).await;
    directory.update_relay(node(2, 8102)).await;
    assert!(!directory.all_ready().await, "clients still missing");

    directory.register_client(node(100, 8200)).await;
    assert!(directory.all_ready().await);
}

#[tokio::test]
async fn heartbeats_refresh_the_right_registry() {
    let (directory, _guard) = directory(Config { min_relays: 1, min_clients: 1, ..Config::default() });

    directory.register_client(node(100, 8200)).await;
    // A heartbeat for a known client must not create a phantom relay.
    directory.update_node(node(100, 8200)).await;
    assert!(directory.active_relays().await.is_empty());

    // Unknown ids register as relays on first contact.
    directory.update_node(node(1, 8101)).await;
    assert_eq!(directory.active_relays().await.len(), 1);
}

#[tokio::test]
async fn registration_surface_end_to_end() {
    let (directory, _guard) =
        directory(Config { min_relays: 1, min_clients: 1, ..Config::default() });
    let app = router(Arc::clone(&directory));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let http = reqwest::Client::new();
    let base = format!("http://{addr}");

    let response = http
        .post(format!("{base}/registerRelay"))
        .json(&node(1, 8101))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = http
        .post(format!("{base}/registerClient"))
        .json(&node(100, 8200))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = http
        .post(format!("{base}/updateNode"))
        .json(&node(1, 8101))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let intent = IntentToSend { from: node(100, 8200), to: vec![node(101, 8201)], time: now_millis() };
    let response = http
        .post(format!("{base}/registerIntentToSend"))
        .json(&intent)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let listed: Vec<PublicNodeApi> =
        http.get(format!("{base}/nodes")).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, 1);

    assert!(directory.all_ready().await);
}

#[tokio::test]
async fn malformed_registration_is_bad_request() {
    let (directory, _guard) = directory(Config::default());
    let app = router(directory);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/registerRelay"))
        .header("content-type", "application/json")
        .body("{\"id\": \"not a number\"}")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
