//! Outbound onion delivery.
//!
//! The engine talks to the next hop through this seam so the forwarding
//! state machine is testable without sockets. Sends are fire-and-forget:
//! a transport failure degrades the layer's anonymity set and is never
//! retried, since a retry would be linkable.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core_api::OnionApi;

/// Default timeout for every outbound request; a hop that cannot answer in
/// this window is treated as having dropped the onion.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// The shared outbound HTTP client.
pub fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },
}

#[async_trait]
pub trait OnionSender: Send + Sync {
    /// Deliver `body` to `to`'s `/receive` endpoint.
    async fn send(&self, to: &str, body: OnionApi) -> Result<(), TransportError>;
}

/// The production sender: one JSON POST per onion.
pub struct HttpSender {
    http: reqwest::Client,
}

impl HttpSender {
    pub fn new(http: reqwest::Client) -> Self {
        HttpSender { http }
    }
}

#[async_trait]
impl OnionSender for HttpSender {
    async fn send(&self, to: &str, body: OnionApi) -> Result<(), TransportError> {
        let url = format!("{}/receive", to.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed { to: to.to_string(), reason: e.to_string() })?;
        if !response.status().is_success() {
            return Err(TransportError::SendFailed {
                to: to.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}
