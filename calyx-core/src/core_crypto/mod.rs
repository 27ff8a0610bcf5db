//! Cryptographic primitives for the onion codec.
//!
//! Two operations cover everything the protocol needs: symmetric AEAD under
//! a per-layer key, and public-key sealing of small header tuples to a
//! relay's long-term X25519 key. Ciphertexts travel base64-encoded inside
//! JSON bodies; the helpers here work on raw bytes.

pub mod aead;
pub mod error;
pub mod keys;
pub mod seal;

pub use aead::{decrypt, encrypt};
pub use error::CryptoError;
pub use keys::{Keypair, SymmetricKey, KEY_LEN};
pub use seal::{open, seal};
