use thiserror::Error;

/// Peel and construction failures. Every receive-path failure maps to
/// "drop + log + counter" at the relay; none of these propagate to a peer.
#[derive(Debug, Error)]
pub enum OnionError {
    #[error("malformed onion: {0}")]
    Malformed(String),
    #[error("content tag mismatch")]
    BadTag,
    #[error("sepal rejected: {0}")]
    BadSepal(String),
    #[error("layer decryption failed")]
    DecryptFailure,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("message exceeds {max} bytes")]
    MessageTooLong { max: usize },
}

impl OnionError {
    /// Stable label used for drop counters.
    pub fn counter_label(&self) -> &'static str {
        match self {
            OnionError::Malformed(_) => "malformed",
            OnionError::BadTag => "bad_tag",
            OnionError::BadSepal(_) => "bad_sepal",
            OnionError::DecryptFailure => "decrypt_failure",
            OnionError::InvalidPath(_) => "invalid_path",
            OnionError::MessageTooLong { .. } => "message_too_long",
        }
    }
}
