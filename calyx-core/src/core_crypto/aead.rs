//! Symmetric authenticated encryption.
//!
//! Wire layout per ciphertext: NONCE[12] | CT+TAG. A fresh nonce is drawn
//! for every encryption; keys are never reused across layers, so nonce
//! collisions are not a concern beyond the RNG itself.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, KeyInit, Nonce};
use rand::rngs::OsRng;

use super::error::CryptoError;
use super::keys::SymmetricKey;

const NONCE_LEN: usize = 12;
/// Poly1305 tag length; the minimum ciphertext is an empty plaintext.
const MIN_LEN: usize = NONCE_LEN + 16;

/// `Enc_sym`: encrypt `plaintext` under `key`.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encrypt)?;
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// `Dec_sym`: decrypt, failing hard on tag mismatch.
pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < MIN_LEN {
        return Err(CryptoError::InvalidCiphertext);
    }
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Decrypt)
}
