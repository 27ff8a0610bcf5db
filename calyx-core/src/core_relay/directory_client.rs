//! Relay/client-side registration and heartbeat against the directory.

use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core_api::{now_millis, IntentToSend, PublicNodeApi};

/// Heartbeat period for `/updateNode`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DirectoryClientError {
    #[error("request to directory failed: {0}")]
    Request(String),
    #[error("directory answered with unexpected status {0}")]
    UnexpectedStatus(StatusCode),
}

/// A node's view of the directory: where it is and who we are.
pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
    id: u32,
    address: String,
    host: String,
    port: u16,
    prometheus_port: u16,
    public_key: String,
}

impl DirectoryClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: String,
        http: reqwest::Client,
        id: u32,
        address: String,
        host: String,
        port: u16,
        prometheus_port: u16,
        public_key: String,
    ) -> Self {
        DirectoryClient { base_url, http, id, address, host, port, prometheus_port, public_key }
    }

    /// This node's public record, freshly timestamped.
    pub fn node_info(&self) -> PublicNodeApi {
        PublicNodeApi {
            id: self.id,
            address: self.address.clone(),
            host: self.host.clone(),
            port: self.port,
            public_key: self.public_key.clone(),
            prometheus_port: self.prometheus_port,
            time: now_millis(),
        }
    }

    /// Initial relay registration; the directory answers 201.
    pub async fn register_relay(&self) -> Result<(), DirectoryClientError> {
        info!(id = self.id, "registering relay with directory");
        self.post_node("/registerRelay", StatusCode::CREATED).await
    }

    /// Initial client registration; the directory answers 201.
    pub async fn register_client(&self) -> Result<(), DirectoryClientError> {
        info!(id = self.id, "registering client with directory");
        self.post_node("/registerClient", StatusCode::CREATED).await
    }

    /// Periodic heartbeat; the directory answers 200.
    pub async fn update_node(&self) -> Result<(), DirectoryClientError> {
        self.post_node("/updateNode", StatusCode::OK).await
    }

    /// Announce intended recipients for the next run.
    pub async fn register_intent_to_send(
        &self,
        to: Vec<PublicNodeApi>,
    ) -> Result<(), DirectoryClientError> {
        let intent = IntentToSend { from: self.node_info(), to, time: now_millis() };
        let url = format!("{}/registerIntentToSend", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&intent)
            .send()
            .await
            .map_err(|e| DirectoryClientError::Request(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(DirectoryClientError::UnexpectedStatus(response.status()));
        }
        Ok(())
    }

    async fn post_node(
        &self,
        endpoint: &str,
        expected: StatusCode,
    ) -> Result<(), DirectoryClientError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .json(&self.node_info())
            .send()
            .await
            .map_err(|e| DirectoryClientError::Request(e.to_string()))?;
        if response.status() != expected {
            return Err(DirectoryClientError::UnexpectedStatus(response.status()));
        }
        Ok(())
    }

    /// Heartbeat loop; runs until shutdown. A failed beat is logged and the
    /// ticker keeps going, the directory expires us on its own clock.
    pub fn spawn_heartbeat(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.update_node().await {
                            warn!(error = %e, "heartbeat to directory failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!(id = self.id, "heartbeat stopped");
                        return;
                    }
                }
            }
        });
    }
}
