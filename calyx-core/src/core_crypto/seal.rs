//! Public-key sealing of header tuples to a relay's long-term key.
//!
//! Envelope layout: VERSION[1] | EPK[32] | NONCE[12] | CT+TAG. An ephemeral
//! X25519 exchange against the recipient's static key feeds HKDF-SHA256,
//! whose output keys a one-shot ChaCha20Poly1305.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::error::CryptoError;

const VERSION: u8 = 0x01;
const EPK_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const MIN_LEN: usize = 1 + EPK_LEN + NONCE_LEN + 16;
const HKDF_INFO: &[u8] = b"calyx:seal:v1";

fn derive_key(shared: &[u8; 32], ephemeral_pk: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(ephemeral_pk), shared);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key).expect("HKDF output length is valid");
    key
}

/// `Enc_pk`: seal `plaintext` to `recipient`.
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(recipient);
    let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes());

    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Encrypt)?;
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(MIN_LEN + ciphertext.len());
    out.push(VERSION);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// `Dec_pk`: open an envelope sealed to our static key.
pub fn open(secret: &StaticSecret, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < MIN_LEN {
        return Err(CryptoError::InvalidCiphertext);
    }
    if envelope[0] != VERSION {
        return Err(CryptoError::UnsupportedVersion(envelope[0]));
    }

    let epk_bytes: [u8; EPK_LEN] = envelope[1..1 + EPK_LEN]
        .try_into()
        .expect("slice length checked above");
    let nonce_bytes = &envelope[1 + EPK_LEN..1 + EPK_LEN + NONCE_LEN];
    let ciphertext = &envelope[1 + EPK_LEN + NONCE_LEN..];

    let ephemeral_public = PublicKey::from(epk_bytes);
    let shared = secret.diffie_hellman(&ephemeral_public);
    let key = derive_key(shared.as_bytes(), &epk_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Decrypt)
}
