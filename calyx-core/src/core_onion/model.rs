//! The layered onion record and its sealed header tuple.
//!
//! An onion is the triple `{Header, Content, Sepal}`. All binary fields are
//! base64 strings on the wire (the HTTP bodies are JSON); in memory they
//! stay raw bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::OnionError;
use super::sepal::Sepal;

/// Fixed plaintext length: null-terminated, null-padded.
pub const MESSAGE_LEN: usize = 256;

/// Base64 (de)serialization for byte fields inside JSON bodies.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Like [`b64`], for lists of byte strings.
pub(crate) mod b64_list {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_seq(items.iter().map(|b| BASE64.encode(b)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(de)?;
        encoded
            .into_iter()
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Position-dependent behaviour of a hop, carried inside the sealed tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mixer,
    Gatekeeper,
    LastGatekeeper,
    Recipient,
}

/// One layer of an onion as seen by the hop that receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Onion {
    pub header: Header,
    #[serde(with = "b64")]
    pub content: Vec<u8>,
    pub sepal: Sepal,
}

/// `{E, B[], A[]}`: the sealed layer tuple, the encrypted address chain and
/// the acceptable sepal digests for this hop (gatekeepers only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    #[serde(with = "b64")]
    pub e: Vec<u8>,
    #[serde(with = "b64_list")]
    pub b: Vec<Vec<u8>>,
    #[serde(default)]
    pub a: Vec<String>,
}

impl Header {
    pub fn empty() -> Self {
        Header { e: Vec::new(), b: Vec::new(), a: Vec::new() }
    }
}

/// Plaintext of `Header.E`: `{tag, role, layer, layerKey}` plus the
/// checkpoint nonce. A non-empty nonce marks a checkpoint onion.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SealedLayer {
    pub tag: String,
    pub role: Role,
    pub layer: usize,
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Plaintext of `B[1]`: the next hop's address, its sealed layer tuple and
/// its acceptable sepal digests.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NextHop {
    pub address: String,
    #[serde(with = "b64")]
    pub envelope: Vec<u8>,
    #[serde(default)]
    pub accept: Vec<String>,
}

/// Content binding: SHA-256 over `B[2..] ‖ Content`, hex-encoded. Verified
/// against the sealed tag at every peel.
pub(crate) fn layer_tag(b: &[Vec<u8>], content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for entry in b.iter().skip(1) {
        hasher.update(entry);
    }
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Pad a message to [`MESSAGE_LEN`] bytes: the payload, a null terminator,
/// then nulls to the end.
pub fn pad_message(message: &str) -> Result<Vec<u8>, OnionError> {
    let bytes = message.as_bytes();
    if bytes.len() >= MESSAGE_LEN {
        return Err(OnionError::MessageTooLong { max: MESSAGE_LEN - 1 });
    }
    let mut padded = vec![0u8; MESSAGE_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// Recover the message from a padded plaintext (everything before the first
/// null byte).
pub fn unpad_message(padded: &[u8]) -> String {
    let end = padded.iter().position(|&b| b == 0).unwrap_or(padded.len());
    String::from_utf8_lossy(&padded[..end]).into_owned()
}
