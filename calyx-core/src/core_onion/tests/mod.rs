//! End-to-end codec tests: form, peel hop by hop, bruise, tamper.

use crate::core_crypto::Keypair;
use crate::core_onion::error::OnionError;
use crate::core_onion::form::{form_onion, OnionPath, PathHop};
use crate::core_onion::model::{unpad_message, Onion, Role, MESSAGE_LEN};
use crate::core_onion::peel::peel_onion;

fn make_path(l1: usize, l2: usize) -> (OnionPath, Vec<Keypair>) {
    let pairs: Vec<Keypair> = (0..l1 + l2 + 1).map(|_| Keypair::generate()).collect();
    let hop = |pair: &Keypair, address: String| PathHop { address, public_key: *pair.public() };
    let mixers = (0..l1).map(|i| hop(&pairs[i], format!("http://mixer-{i}:8100"))).collect();
    let gatekeepers =
        (0..l2).map(|i| hop(&pairs[l1 + i], format!("http://gatekeeper-{i}:8200"))).collect();
    let recipient = hop(&pairs[l1 + l2], "http://recipient:8300".to_string());
    (OnionPath { mixers, gatekeepers, recipient }, pairs)
}

/// Walk an onion through every relay hop. `bruises[m]` decides what mixer
/// `m + 1` does after its peel. Returns the padded message recovered by the
/// recipient.
fn transit(
    first: Onion,
    pairs: &[Keypair],
    l1: usize,
    bruises: &[bool],
) -> Result<Vec<u8>, OnionError> {
    let l = pairs.len();
    let mut current = first;
    for i in 1..l {
        let sepal_before = current.sepal.len();
        let mut peeled = peel_onion(&current, pairs[i - 1].secret())?;
        assert_eq!(peeled.layer, i);
        match peeled.role {
            Role::Mixer => {
                if bruises[i - 1] {
                    peeled.onion.sepal.add_bruise();
                } else {
                    peeled.onion.sepal.drop_block();
                }
                assert_eq!(peeled.onion.sepal.len(), sepal_before - 1);
            }
            Role::Gatekeeper => assert_eq!(peeled.onion.sepal.len(), sepal_before),
            Role::LastGatekeeper => assert!(peeled.onion.sepal.is_empty()),
            Role::Recipient => panic!("relay hop peeled to recipient role"),
        }
        assert!(peeled.next_hop.is_some());
        current = peeled.onion;
    }
    let terminal = peel_onion(&current, pairs[l - 1].secret())?;
    assert_eq!(terminal.role, Role::Recipient);
    assert!(terminal.next_hop.is_none());
    Ok(terminal.onion.content)
}

#[test]
fn honest_roundtrip_recovers_message() {
    let (path, pairs) = make_path(2, 1);
    let onions = form_onion("hello", &path, 1, &vec![None; 4]).unwrap();
    let message = transit(onions.into_iter().next().unwrap(), &pairs, 2, &[false, false]).unwrap();
    assert_eq!(message.len(), MESSAGE_LEN);
    assert_eq!(unpad_message(&message), "hello");
}

#[test]
fn single_bruise_at_tolerance_one_defeats_delivery() {
    let (path, pairs) = make_path(2, 1);
    let onions = form_onion("hello", &path, 1, &vec![None; 4]).unwrap();
    let err = transit(onions.into_iter().next().unwrap(), &pairs, 2, &[true, false]).unwrap_err();
    assert!(matches!(err, OnionError::BadSepal(_)));
}

#[test]
fn single_bruise_within_tolerance_two_delivers() {
    let (path, pairs) = make_path(2, 1);
    let onions = form_onion("hello", &path, 2, &vec![None; 4]).unwrap();
    let message = transit(onions.into_iter().next().unwrap(), &pairs, 2, &[true, false]).unwrap();
    assert_eq!(unpad_message(&message), "hello");
}

#[test]
fn recovery_succeeds_exactly_when_bruises_stay_below_tolerance() {
    let l1 = 3;
    for d in 0..=l1 + 1 {
        for bruise_count in 0..=l1 {
            let (path, pairs) = make_path(l1, 2);
            let onions = form_onion("tally", &path, d, &vec![None; 6]).unwrap();
            let bruises: Vec<bool> = (0..l1).map(|m| m < bruise_count).collect();
            let result = transit(onions.into_iter().next().unwrap(), &pairs, l1, &bruises);
            if bruise_count < d {
                let message = result.unwrap_or_else(|e| {
                    panic!("d={d} b={bruise_count}: expected delivery, got {e}")
                });
                assert_eq!(unpad_message(&message), "tally");
            } else {
                assert!(
                    matches!(result, Err(OnionError::BadSepal(_))),
                    "d={d} b={bruise_count}: expected BadSepal"
                );
            }
        }
    }
}

#[test]
fn bruise_position_does_not_matter() {
    let (path, pairs) = make_path(3, 2);
    let onions = form_onion("order", &path, 2, &vec![None; 6]).unwrap();
    // One bruise from the last mixer instead of the first.
    let message =
        transit(onions.into_iter().next().unwrap(), &pairs, 3, &[false, false, true]).unwrap();
    assert_eq!(unpad_message(&message), "order");
}

#[test]
fn full_tolerance_survives_all_bruises() {
    let l1 = 2;
    let (path, pairs) = make_path(l1, 1);
    let onions = form_onion("sturdy", &path, l1 + 1, &vec![None; 4]).unwrap();
    let message = transit(onions.into_iter().next().unwrap(), &pairs, l1, &[true, true]).unwrap();
    assert_eq!(unpad_message(&message), "sturdy");
}

#[test]
fn tampered_b_entry_is_bad_tag() {
    let (path, pairs) = make_path(2, 1);
    let mut onion = form_onion("hello", &path, 1, &vec![None; 4]).unwrap().remove(0);
    onion.header.b[1][0] ^= 0xff;
    assert!(matches!(peel_onion(&onion, pairs[0].secret()), Err(OnionError::BadTag)));
}

#[test]
fn tampered_content_is_bad_tag() {
    let (path, pairs) = make_path(2, 1);
    let mut onion = form_onion("hello", &path, 1, &vec![None; 4]).unwrap().remove(0);
    let last = onion.content.len() - 1;
    onion.content[last] ^= 0xff;
    assert!(matches!(peel_onion(&onion, pairs[0].secret()), Err(OnionError::BadTag)));
}

#[test]
fn tampered_first_b_entry_fails_decryption() {
    // B[1] sits outside the tag; its own AEAD tag catches the mutation.
    let (path, pairs) = make_path(2, 1);
    let mut onion = form_onion("hello", &path, 1, &vec![None; 4]).unwrap().remove(0);
    let last = onion.header.b[0].len() - 1;
    onion.header.b[0][last] ^= 0xff;
    assert!(matches!(peel_onion(&onion, pairs[0].secret()), Err(OnionError::DecryptFailure)));
}

#[test]
fn wrong_hop_key_fails_unsealing() {
    let (path, pairs) = make_path(2, 1);
    let onion = form_onion("hello", &path, 1, &vec![None; 4]).unwrap().remove(0);
    assert!(matches!(
        peel_onion(&onion, pairs[1].secret()),
        Err(OnionError::DecryptFailure)
    ));
}

#[test]
fn rewritten_sepal_is_rejected_by_gatekeeper() {
    let (path, pairs) = make_path(1, 1);
    let onions = form_onion("hello", &path, 1, &vec![None; 3]).unwrap();
    let mut peeled = peel_onion(&onions[0], pairs[0].secret()).unwrap();
    peeled.onion.sepal.drop_block();
    // A mixer rewriting the surviving block outside the protocol trips the
    // acceptable-digest check at the gatekeeper.
    peeled.onion.sepal.blocks[0][0] ^= 0xff;
    let err = peel_onion(&peeled.onion, pairs[1].secret()).unwrap_err();
    assert!(matches!(err, OnionError::BadSepal(_)));
}

#[test]
fn checkpoint_nonce_surfaces_only_at_its_hop() {
    let (path, pairs) = make_path(2, 1);
    let nonces = vec![None, Some("nonce-m2".to_string()), None, None];
    let onions = form_onion("", &path, 1, &nonces).unwrap();

    let first = peel_onion(&onions[0], pairs[0].secret()).unwrap();
    assert_eq!(first.nonce, None);

    let mut hop_two_input = first.onion;
    hop_two_input.sepal.drop_block();
    let second = peel_onion(&hop_two_input, pairs[1].secret()).unwrap();
    assert_eq!(second.nonce.as_deref(), Some("nonce-m2"));
}

#[test]
fn direct_send_peels_at_recipient_only() {
    let (path, pairs) = make_path(0, 0);
    let onions = form_onion("direct", &path, 0, &[None]).unwrap();
    let terminal = peel_onion(&onions[0], pairs[0].secret()).unwrap();
    assert_eq!(terminal.role, Role::Recipient);
    assert_eq!(unpad_message(&terminal.onion.content), "direct");
}

#[test]
fn every_formed_layer_matches_the_honest_transit() {
    // The all-honest intermediate layers returned by form_onion are exactly
    // what each hop would see on the wire.
    let (path, pairs) = make_path(2, 2);
    let onions = form_onion("layers", &path, 1, &vec![None; 5]).unwrap();
    let mut current = onions[0].clone();
    for (i, expected) in onions.iter().enumerate().skip(1) {
        let mut peeled = peel_onion(&current, pairs[i - 1].secret()).unwrap();
        if peeled.role == Role::Mixer {
            peeled.onion.sepal.drop_block();
        }
        assert_eq!(peeled.onion.content, expected.content, "content diverges at hop {}", i + 1);
        assert_eq!(
            peeled.onion.sepal.blocks, expected.sepal.blocks,
            "sepal diverges at hop {}",
            i + 1
        );
        assert_eq!(peeled.onion.header.b, expected.header.b, "chain diverges at hop {}", i + 1);
        current = peeled.onion;
    }
}
