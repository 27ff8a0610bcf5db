//! The onion codec: construction, per-hop peeling, and the sepal that
//! carries the drop-detection property.

pub mod error;
pub mod form;
pub mod model;
pub mod peel;
pub mod sepal;

#[cfg(test)]
pub mod tests;

pub use error::OnionError;
pub use form::{form_onion, OnionPath, PathHop};
pub use model::{pad_message, unpad_message, Header, Onion, Role, MESSAGE_LEN};
pub use peel::{peel_onion, PeeledOnion};
pub use sepal::Sepal;
