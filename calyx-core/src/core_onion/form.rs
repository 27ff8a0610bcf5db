//! Sender-side onion construction.
//!
//! `form_onion` builds every layer of the record: fresh layer keys and a
//! master key, the nested content chain, the sepal, the acceptable-digest
//! sets for the gatekeepers and the headers back-to-front. Layer `i`'s
//! `B[1]` seals the next hop's address together with its layer tuple and
//! digest set; the remaining entries re-encrypt the next layer's chain.

use x25519_dalek::PublicKey;

use crate::core_crypto::{self, SymmetricKey};

use super::error::OnionError;
use super::model::{layer_tag, pad_message, Header, NextHop, Onion, Role, SealedLayer};
use super::sepal::{self, Sepal, SepalBuild};

/// One hop of a routing path: where to send and whom to seal to.
#[derive(Clone)]
pub struct PathHop {
    pub address: String,
    pub public_key: PublicKey,
}

/// `P = [M_1..M_l1, G_1..G_l2, R]`.
#[derive(Clone)]
pub struct OnionPath {
    pub mixers: Vec<PathHop>,
    pub gatekeepers: Vec<PathHop>,
    pub recipient: PathHop,
}

impl OnionPath {
    pub fn l1(&self) -> usize {
        self.mixers.len()
    }

    pub fn l2(&self) -> usize {
        self.gatekeepers.len()
    }

    /// Total path length `l = l1 + l2 + 1`.
    pub fn len(&self) -> usize {
        self.l1() + self.l2() + 1
    }

    /// Hop `i`, 1-based.
    pub fn hop(&self, i: usize) -> &PathHop {
        let l1 = self.l1();
        if i <= l1 {
            &self.mixers[i - 1]
        } else if i < self.len() {
            &self.gatekeepers[i - 1 - l1]
        } else {
            &self.recipient
        }
    }

    /// Address of the first hop, where the sender posts the onion.
    pub fn entry_address(&self) -> &str {
        &self.hop(1).address
    }

    fn role_of(&self, i: usize) -> Role {
        let l = self.len();
        if i == l {
            Role::Recipient
        } else if i == l - 1 {
            Role::LastGatekeeper
        } else if i <= self.l1() {
            Role::Mixer
        } else {
            Role::Gatekeeper
        }
    }
}

/// Build all `l` layers of an onion for `message` along `path`.
///
/// `d` is the bruise tolerance: the sepal carries `d` master-key blocks, so
/// recovery at the last gatekeeper survives up to `d - 1` bruising mixers.
/// `nonces` holds one entry per hop; a `Some` marks that hop as a
/// checkpoint verifier and shows up in its peeled metadata.
///
/// Index 0 of the result is the onion the first hop receives; later entries
/// are the layers as they would arrive at each hop of an all-honest run,
/// which is what the layer tests probe.
pub fn form_onion(
    message: &str,
    path: &OnionPath,
    d: usize,
    nonces: &[Option<String>],
) -> Result<Vec<Onion>, OnionError> {
    let l1 = path.l1();
    let l2 = path.l2();
    let l = path.len();

    if l1 > 0 && l2 == 0 {
        return Err(OnionError::InvalidPath(
            "a path with mixers needs at least one gatekeeper".to_string(),
        ));
    }
    if nonces.len() != l {
        return Err(OnionError::InvalidPath(format!(
            "expected {} nonce slots, got {}",
            l,
            nonces.len()
        )));
    }
    if l >= 2 && d > l1 + 1 {
        return Err(OnionError::InvalidPath(format!(
            "bruise tolerance {} exceeds sepal capacity {}",
            d,
            l1 + 1
        )));
    }

    let padded = pad_message(message)?;

    // Fresh key material: one layer key per hop plus the master key.
    let layer_keys: Vec<SymmetricKey> = (0..l).map(|_| SymmetricKey::generate()).collect();
    let master_key = SymmetricKey::generate();

    // Nested content chain. Only the penultimate layer is keyed with the
    // master key; that is the layer the last gatekeeper must unwrap.
    let mut contents: Vec<Vec<u8>> = vec![Vec::new(); l];
    contents[l - 1] = sym_encrypt(&layer_keys[l - 1], &padded)?;
    if l >= 2 {
        contents[l - 2] = sym_encrypt(&master_key, &contents[l - 1])?;
    }
    for i in (0..l.saturating_sub(2)).rev() {
        contents[i] = sym_encrypt(&layer_keys[i], &contents[i + 1])?;
    }

    // Sepal and the per-hop acceptable digests. A gatekeeper at hop i may
    // see any survivor candidate b in [0, l1] at wrap state i.
    let sepal_build: Option<SepalBuild> = if l >= 2 {
        Some(sepal::build_sepal(&master_key, d, &layer_keys[..l - 1], l1)?)
    } else {
        None
    };

    let mut accept: Vec<Vec<String>> = vec![Vec::new(); l + 1];
    if let Some(build) = &sepal_build {
        for i in (l1 + 1)..l {
            accept[i] = build.states[i - 1]
                .iter()
                .map(|state| sepal::digest_blocks(std::slice::from_ref(state)))
                .collect();
        }
    }

    // Headers back-to-front. envelopes[i] / b_chains[i] are 1-based.
    let mut envelopes: Vec<Vec<u8>> = vec![Vec::new(); l + 1];
    let mut b_chains: Vec<Vec<Vec<u8>>> = vec![Vec::new(); l + 1];

    envelopes[l] = seal_layer(
        path.hop(l),
        &layer_tag(&[], &contents[l - 1]),
        Role::Recipient,
        l,
        &layer_keys[l - 1],
        nonces[l - 1].clone(),
    )?;

    for i in (1..l).rev() {
        let next = NextHop {
            address: path.hop(i + 1).address.clone(),
            envelope: envelopes[i + 1].clone(),
            accept: accept[i + 1].clone(),
        };
        let next_bytes = serde_json::to_vec(&next)
            .map_err(|e| OnionError::Malformed(format!("next-hop encoding failed: {e}")))?;

        let mut chain = Vec::with_capacity(l - i);
        chain.push(sym_encrypt(&layer_keys[i - 1], &next_bytes)?);
        for j in 0..(l - i - 1) {
            chain.push(sym_encrypt(&layer_keys[i - 1], &b_chains[i + 1][j])?);
        }

        envelopes[i] = seal_layer(
            path.hop(i),
            &layer_tag(&chain, &contents[i - 1]),
            path.role_of(i),
            i,
            &layer_keys[i - 1],
            nonces[i - 1].clone(),
        )?;
        b_chains[i] = chain;
    }

    // Assemble one onion per hop, with the sepal in its all-honest state.
    let onions = (1..=l)
        .map(|i| Onion {
            header: Header {
                e: envelopes[i].clone(),
                b: b_chains[i].clone(),
                a: accept[i].clone(),
            },
            content: contents[i - 1].clone(),
            // The last gatekeeper consumes the final block; the recipient
            // never sees a sepal.
            sepal: match &sepal_build {
                Some(build) if i < l => build.at_hop(i, l1),
                _ => Sepal::empty(),
            },
        })
        .collect();

    Ok(onions)
}

fn sym_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, OnionError> {
    core_crypto::encrypt(key, plaintext)
        .map_err(|e| OnionError::Malformed(format!("layer encryption failed: {e}")))
}

fn seal_layer(
    hop: &PathHop,
    tag: &str,
    role: Role,
    layer: usize,
    key: &SymmetricKey,
    nonce: Option<String>,
) -> Result<Vec<u8>, OnionError> {
    let sealed = SealedLayer {
        tag: tag.to_string(),
        role,
        layer,
        key: key.as_bytes().to_vec(),
        nonce,
    };
    let bytes = serde_json::to_vec(&sealed)
        .map_err(|e| OnionError::Malformed(format!("layer tuple encoding failed: {e}")))?;
    core_crypto::seal(&hop.public_key, &bytes)
        .map_err(|e| OnionError::Malformed(format!("layer sealing failed: {e}")))
}
