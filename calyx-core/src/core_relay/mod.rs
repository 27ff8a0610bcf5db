//! The relay: forwarding engine, HTTP surface and directory liaison.

pub mod corruption;
pub mod directory_client;
pub mod engine;
pub mod server;
pub mod transport;

#[cfg(test)]
pub mod tests;

pub use corruption::{corrupted_relay_ids, CORRUPTION_SEED};
pub use directory_client::{DirectoryClient, DirectoryClientError, HEARTBEAT_INTERVAL};
pub use engine::{RelayEngine, RelayError};
pub use server::{metrics_router, Relay};
pub use transport::{HttpSender, OnionSender, TransportError};
