//! Key material: per-layer symmetric keys and relay long-term keypairs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::CryptoError;

/// Length of every symmetric key in the protocol.
pub const KEY_LEN: usize = 32;

/// A fresh-per-onion-per-hop symmetric key. Zeroed on drop so layer keys
/// do not outlive the peel that consumed them.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        SymmetricKey(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len())))?;
        Ok(SymmetricKey(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A relay's long-term X25519 keypair. The public half is published through
/// the directory as base64; the secret half never leaves the process.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Keypair { secret, public }
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Base64 encoding of the public key, as published to the directory.
    pub fn public_base64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }
}

/// Decode a directory-published base64 public key.
pub fn public_key_from_base64(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    Ok(PublicKey::from(arr))
}
