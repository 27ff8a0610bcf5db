use thiserror::Error;

/// Failures from the AEAD and sealing primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    Encrypt,
    #[error("AEAD decryption failed, wrong key or tampered ciphertext")]
    Decrypt,
    #[error("ciphertext too short or malformed")]
    InvalidCiphertext,
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid key bytes: {0}")]
    InvalidKey(String),
}
