//! The directory's HTTP surface.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::core_api::{IntentToSend, PublicNodeApi};
use crate::shutdown::ShutdownCoordinator;

use super::board::Directory;

pub fn router(directory: Arc<Directory>) -> Router {
    Router::new()
        .route("/registerRelay", post(handle_register_relay))
        .route("/registerClient", post(handle_register_client))
        .route("/registerIntentToSend", post(handle_register_intent))
        .route("/updateNode", post(handle_update_node))
        .route("/nodes", get(handle_nodes))
        .with_state(directory)
}

/// Serve the directory surface until shutdown.
pub async fn serve(
    directory: Arc<Directory>,
    addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "directory listening");
    axum::serve(listener, router(directory))
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
}

async fn handle_register_relay(
    State(directory): State<Arc<Directory>>,
    Json(node): Json<PublicNodeApi>,
) -> StatusCode {
    info!(id = node.id, "registering relay");
    directory.update_relay(node).await;
    StatusCode::CREATED
}

async fn handle_register_client(
    State(directory): State<Arc<Directory>>,
    Json(node): Json<PublicNodeApi>,
) -> StatusCode {
    info!(id = node.id, "registering client");
    directory.register_client(node).await;
    StatusCode::CREATED
}

async fn handle_register_intent(
    State(directory): State<Arc<Directory>>,
    Json(intent): Json<IntentToSend>,
) -> StatusCode {
    directory.register_intent(intent).await;
    StatusCode::OK
}

async fn handle_update_node(
    State(directory): State<Arc<Directory>>,
    Json(node): Json<PublicNodeApi>,
) -> StatusCode {
    directory.update_node(node).await;
    StatusCode::OK
}

async fn handle_nodes(State(directory): State<Arc<Directory>>) -> Json<Vec<PublicNodeApi>> {
    Json(directory.active_relays().await)
}
