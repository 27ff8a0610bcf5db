//! Calyx Core Library
//!
//! Core functionality for the calyx anonymous-messaging mix-net: the onion
//! codec with its sepal drop-detection mechanism, the relay forwarding
//! engine, the directory service and the sending client.

// Allow some clippy pedantry that is not critical for alpha release
#![allow(
    clippy::too_many_arguments,
    clippy::module_inception,
    clippy::new_without_default,
    clippy::large_enum_variant,
    clippy::should_implement_trait
)]

pub mod config;
pub mod core_api;
pub mod core_checkpoint;
pub mod core_client;
pub mod core_crypto;
pub mod core_directory;
pub mod core_onion;
pub mod core_relay;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use config::{Config, ConfigError};
pub use core_api::{
    now_millis, Checkpoint, CheckpointOnion, ClientStartRunApi, IntentToSend, OnionApi,
    PublicNodeApi, RelayStartRunApi,
};
pub use core_checkpoint::{generate_schedule, CheckpointSchedule};
pub use core_client::Client;
pub use core_crypto::{Keypair, SymmetricKey};
pub use core_directory::Directory;
pub use core_onion::{form_onion, peel_onion, Onion, OnionError, OnionPath, PathHop, Role};
pub use core_relay::{Relay, RelayEngine, RelayError};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use shutdown::{install_signal_handlers, ShutdownCoordinator};
