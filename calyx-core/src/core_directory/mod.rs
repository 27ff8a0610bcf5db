//! The directory (bulletin board): keeps the rosters and coordinates runs.

pub mod board;
pub mod error;
pub mod persist;
pub mod server;
pub mod views;

#[cfg(test)]
pub mod tests;

pub use board::{Directory, POLL_INTERVAL};
pub use error::DirectoryError;
pub use persist::{read_roster, write_roster, PersistedNode, PersistedRoster};
pub use server::{router, serve};
pub use views::{NodeView, Registry, ACTIVE_TTL};
