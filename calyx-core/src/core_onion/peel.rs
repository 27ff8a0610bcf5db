//! Hop-side onion peeling.
//!
//! One peel: open the sealed layer tuple, check the content binding,
//! shift the address chain down one layer, strip one encryption layer from
//! content and sepal, and surface the checkpoint metadata. Role decides the
//! sepal handling; the drop/bruise choice itself belongs to the forwarding
//! engine, which mutates the returned sepal.

use x25519_dalek::StaticSecret;

use crate::core_crypto::{self, CryptoError, SymmetricKey};

use super::error::OnionError;
use super::model::{layer_tag, Header, NextHop, Onion, Role, SealedLayer};
use super::sepal::{Sepal, NULL_PREFIX};

/// The outcome of one peel, ready for the forwarding engine.
#[derive(Debug)]
pub struct PeeledOnion {
    pub role: Role,
    pub layer: usize,
    /// Checkpoint nonce from the sealed tuple; `None` for payload onions.
    pub nonce: Option<String>,
    /// Where the peeled onion goes next; `None` at the terminal hop.
    pub next_hop: Option<String>,
    pub onion: Onion,
}

/// Peel one layer with this hop's long-term secret.
pub fn peel_onion(onion: &Onion, secret: &StaticSecret) -> Result<PeeledOnion, OnionError> {
    let sealed_bytes = core_crypto::open(secret, &onion.header.e).map_err(|e| match e {
        CryptoError::Decrypt => OnionError::DecryptFailure,
        other => OnionError::Malformed(other.to_string()),
    })?;
    let sealed: SealedLayer = serde_json::from_slice(&sealed_bytes)
        .map_err(|e| OnionError::Malformed(format!("layer tuple decoding failed: {e}")))?;
    let key = SymmetricKey::from_bytes(&sealed.key)
        .map_err(|e| OnionError::Malformed(e.to_string()))?;

    // Content binding: any mutation of B[2..] or the content flips this.
    if layer_tag(&onion.header.b, &onion.content) != sealed.tag {
        return Err(OnionError::BadTag);
    }

    if sealed.role == Role::Recipient {
        let message = sym_decrypt(&key, &onion.content)?;
        return Ok(PeeledOnion {
            role: sealed.role,
            layer: sealed.layer,
            nonce: sealed.nonce,
            next_hop: None,
            onion: Onion { header: Header::empty(), content: message, sepal: Sepal::empty() },
        });
    }

    let first = onion
        .header
        .b
        .first()
        .ok_or_else(|| OnionError::Malformed("missing address chain".to_string()))?;
    let next_bytes = sym_decrypt(&key, first)?;
    let next: NextHop = serde_json::from_slice(&next_bytes)
        .map_err(|e| OnionError::Malformed(format!("next-hop decoding failed: {e}")))?;

    let mut chain = Vec::with_capacity(onion.header.b.len().saturating_sub(1));
    for entry in onion.header.b.iter().skip(1) {
        chain.push(sym_decrypt(&key, entry)?);
    }

    let (content, sepal) = match sealed.role {
        Role::Mixer => {
            let content = sym_decrypt(&key, &onion.content)?;
            (content, onion.sepal.peel(&key)?)
        }
        Role::Gatekeeper => {
            verify_sepal_digest(&onion.header.a, &onion.sepal)?;
            let content = sym_decrypt(&key, &onion.content)?;
            (content, onion.sepal.peel(&key)?)
        }
        Role::LastGatekeeper => {
            verify_sepal_digest(&onion.header.a, &onion.sepal)?;
            let peeled = onion.sepal.peel(&key)?;
            let master_key = recover_master_key(&peeled)?;
            let content = sym_decrypt(&master_key, &onion.content)?;
            (content, Sepal::empty())
        }
        Role::Recipient => unreachable!("handled above"),
    };

    Ok(PeeledOnion {
        role: sealed.role,
        layer: sealed.layer,
        nonce: sealed.nonce,
        next_hop: Some(next.address),
        onion: Onion {
            header: Header { e: next.envelope, b: chain, a: next.accept },
            content,
            sepal,
        },
    })
}

fn sym_decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, OnionError> {
    core_crypto::decrypt(key, data).map_err(|e| match e {
        CryptoError::InvalidCiphertext => OnionError::Malformed("truncated ciphertext".to_string()),
        _ => OnionError::DecryptFailure,
    })
}

/// Gatekeepers only accept sepals whose digest the sender anticipated; a
/// miss means a mixer rewrote the sepal outside the drop/bruise protocol.
fn verify_sepal_digest(accept: &[String], sepal: &Sepal) -> Result<(), OnionError> {
    let digest = sepal.digest();
    if !accept.iter().any(|candidate| candidate == &digest) {
        return Err(OnionError::BadSepal("digest not in acceptable set".to_string()));
    }
    Ok(())
}

/// Exactly one block survives to the last gatekeeper. It unwraps to the
/// master key iff fewer than `d` mixers bruised; a null block here is the
/// protocol detecting a drop attack.
fn recover_master_key(peeled: &Sepal) -> Result<SymmetricKey, OnionError> {
    if peeled.len() != 1 {
        return Err(OnionError::BadSepal(format!(
            "expected a single surviving block, got {}",
            peeled.len()
        )));
    }
    let block = &peeled.blocks[0];
    if block.starts_with(NULL_PREFIX) {
        return Err(OnionError::BadSepal("master key bruised away".to_string()));
    }
    SymmetricKey::from_bytes(block).map_err(|_| {
        OnionError::BadSepal("surviving block is not a key block".to_string())
    })
}
