//! The relay process: engine + directory client behind an axum surface.
//!
//! Routes: `POST /start` installs a run, `POST /receive` feeds the engine,
//! `POST /register` re-registers with the directory (used when the
//! directory re-prompts from a persisted roster), `GET /metrics` renders
//! the Prometheus snapshot.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::core_api::{OnionApi, RelayStartRunApi};
use crate::core_crypto::Keypair;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;

use super::directory_client::DirectoryClient;
use super::engine::{RelayEngine, RelayError};
use super::transport::HttpSender;

pub struct Relay {
    pub engine: Arc<RelayEngine>,
    pub directory: Arc<DirectoryClient>,
    metrics_handle: PrometheusHandle,
}

impl Relay {
    /// Wire up a relay: fresh keypair, HTTP sender, directory client.
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
        let http = super::transport::default_http_client();

        let engine = Arc::new(RelayEngine::new(
            id,
            address.clone(),
            keypair,
            Arc::new(HttpSender::new(http.clone())),
        ));
        let directory = Arc::new(DirectoryClient::new(
            config.bulletin_board.url(),
            http,
            id,
            address,
            host,
            port,
            prometheus_port,
            public_key,
        ));

        Arc::new(Relay { engine, directory, metrics_handle })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/start", post(handle_start))
            .route("/receive", post(handle_receive))
            .route("/register", post(handle_register))
            .route("/metrics", get(handle_metrics))
            .with_state(self)
    }

    /// Serve the relay surface until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "relay listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .await
    }
}

async fn handle_start(
    State(relay): State<Arc<Relay>>,
    Json(body): Json<RelayStartRunApi>,
) -> StatusCode {
    relay.engine.start_run(body).await;
    StatusCode::OK
}

async fn handle_receive(State(relay): State<Arc<Relay>>, Json(body): Json<OnionApi>) -> StatusCode {
    if let Ok(bytes) = serde_json::to_vec(&body.onion) {
        metrics::record_onion_size(bytes.len());
    }
    match relay.engine.receive(body, Instant::now()).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            // Local recovery is always "drop"; the peer only learns 400.
            let reason = match &e {
                RelayError::Onion(onion) => onion.counter_label(),
                RelayError::NotStarted => "not_started",
            };
            debug!(error = %e, reason, "dropping onion");
            metrics::record_onion_dropped(reason);
            StatusCode::BAD_REQUEST
        }
    }
}

async fn handle_register(State(relay): State<Arc<Relay>>) -> StatusCode {
    let directory = Arc::clone(&relay.directory);
    tokio::spawn(async move {
        if let Err(e) = directory.register_relay().await {
            error!(error = %e, "re-registration with directory failed");
        }
    });
    StatusCode::OK
}

async fn handle_metrics(State(relay): State<Arc<Relay>>) -> String {
    relay.metrics_handle.render()
}

/// A bare `/metrics` router for the dedicated Prometheus listener.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}
