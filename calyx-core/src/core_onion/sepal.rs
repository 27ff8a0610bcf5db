//! The sepal: an ordered list of encrypted blocks that carries the master
//! key redundantly past the mixer stage.
//!
//! A fresh sepal holds `d` key-blocks (innermost plaintext is the master
//! key) followed by `l1 + 1 - d` null-blocks (`b"null"` plus salt, same
//! length). Every block is wrapped under `k_1..k_{l-1}` with 16 bytes of
//! fresh salt appended after each encryption, so each hop strips exactly
//! one layer and the flavours stay indistinguishable until the last
//! gatekeeper.
//!
//! Mixers shrink the sepal by one block per peel: an honest drop takes the
//! tail, a bruise takes the head. With key-blocks at the head, the block
//! surviving `l1` peels is the one originally at index `b` (the number of
//! bruises) and is a key-block iff `b < d`.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core_crypto::{self, SymmetricKey};

use super::error::OnionError;
use super::model::b64_list;

pub(crate) const SALT_LEN: usize = 16;
/// Innermost plaintext length for both block flavours.
pub(crate) const INNER_LEN: usize = 32;
pub(crate) const NULL_PREFIX: &[u8] = b"null";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sepal {
    #[serde(with = "b64_list")]
    pub blocks: Vec<Vec<u8>>,
}

impl Sepal {
    pub fn empty() -> Self {
        Sepal { blocks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Honest mixer transform: remove the tail block.
    pub fn drop_block(&mut self) {
        self.blocks.pop();
    }

    /// Bruising transform: remove the head block, spending one key-block.
    pub fn add_bruise(&mut self) {
        if !self.blocks.is_empty() {
            self.blocks.remove(0);
        }
    }

    /// Strip one encryption layer from every block (trailing salt first).
    pub(crate) fn peel(&self, key: &SymmetricKey) -> Result<Sepal, OnionError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            if block.len() <= SALT_LEN {
                return Err(OnionError::BadSepal("block too short".to_string()));
            }
            let body = &block[..block.len() - SALT_LEN];
            let inner = core_crypto::decrypt(key, body)
                .map_err(|_| OnionError::BadSepal("block decryption failed".to_string()))?;
            blocks.push(inner);
        }
        Ok(Sepal { blocks })
    }

    /// SHA-256 over the concatenated blocks, hex-encoded. Gatekeepers match
    /// this against the acceptable set in their header.
    pub fn digest(&self) -> String {
        digest_blocks(&self.blocks)
    }
}

pub(crate) fn digest_blocks<B: AsRef<[u8]>>(blocks: &[B]) -> String {
    let mut hasher = Sha256::new();
    for block in blocks {
        hasher.update(block.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// A freshly built sepal plus each block's intermediate wrap states:
/// `states[i - 1][block]` is the block as it arrives at hop `i`.
pub(crate) struct SepalBuild {
    pub states: Vec<Vec<Vec<u8>>>,
}

impl SepalBuild {
    /// The sepal the first hop receives.
    pub fn first(&self) -> Sepal {
        Sepal { blocks: self.states[0].clone() }
    }

    /// The sepal as it arrives at hop `i` (1-based) after `i - 1` honest
    /// peels: tail blocks dropped by each mixer already passed.
    pub fn at_hop(&self, i: usize, l1: usize) -> Sepal {
        let peeled_by_mixers = (i - 1).min(l1);
        let survivors = self.states[i - 1].len() - peeled_by_mixers;
        Sepal { blocks: self.states[i - 1][..survivors].to_vec() }
    }
}

/// Construct the sepal for a path with `l1` mixers and layer keys
/// `k_1..k_{l-1}`. `d` of the `l1 + 1` blocks carry `master_key`.
pub(crate) fn build_sepal(
    master_key: &SymmetricKey,
    d: usize,
    layer_keys: &[SymmetricKey],
    l1: usize,
) -> Result<SepalBuild, OnionError> {
    let block_count = l1 + 1;
    if d > block_count {
        return Err(OnionError::InvalidPath(format!(
            "bruise tolerance {} exceeds sepal capacity {}",
            d, block_count
        )));
    }

    let depth = layer_keys.len();
    // states[i - 1][block]: wrap state arriving at hop i, for i in 1..=depth + 1.
    let mut states = vec![Vec::with_capacity(block_count); depth + 1];

    for idx in 0..block_count {
        let inner = if idx < d {
            master_key.as_bytes().to_vec()
        } else {
            let mut value = NULL_PREFIX.to_vec();
            let mut salt = vec![0u8; INNER_LEN - NULL_PREFIX.len()];
            OsRng.fill_bytes(&mut salt);
            value.extend_from_slice(&salt);
            value
        };

        let mut wrapped = inner;
        states[depth].push(wrapped.clone());
        for i in (0..depth).rev() {
            let mut next = core_crypto::encrypt(&layer_keys[i], &wrapped)
                .map_err(|_| OnionError::BadSepal("block encryption failed".to_string()))?;
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            next.extend_from_slice(&salt);
            wrapped = next;
            states[i].push(wrapped.clone());
        }
    }

    Ok(SepalBuild { states })
}
