//! End-to-end exercises of the key-provisioning handshake between two
//! in-process key managers, using the identity attestation stub so round
//! payloads are fully deterministic.

use std::sync::{Arc, Mutex};

use secp256k1::SecretKey;
use txpool_enclave::get_unsecure_sample_secp256k1_sk;
use txpool_enclave_server::attestation::MockAttestation;
use txpool_enclave_server::key_manager::{HandshakeError, KeyManager, NONCE_SIZE, SECRET_KEY_SIZE};

fn seeker() -> KeyManager<MockAttestation> {
    KeyManager::new(MockAttestation, None)
}

fn holder_with(sk: SecretKey) -> KeyManager<MockAttestation> {
    KeyManager::new(MockAttestation, Some(sk))
}

fn other_secret_key() -> SecretKey {
    SecretKey::from_slice(&[0x37u8; 32]).unwrap()
}

/// Drives all four rounds. The holder-side transport establishes the session
/// slot for the calling peer before consuming round 1.
fn run_handshake(
    seeker: &KeyManager<MockAttestation>,
    holder: &KeyManager<MockAttestation>,
    seeker_id: &str,
    holder_id: &str,
) {
    let r1 = seeker.get_auth_data(holder_id).unwrap();
    holder.get_auth_data(seeker_id).unwrap();
    holder.verify_auth(&r1, seeker_id).unwrap();
    let r2 = holder.get_verify_data(seeker_id).unwrap();
    seeker.verify_remote_verify(&r2, holder_id).unwrap();

    let r3 = seeker.get_request_key_data(holder_id).unwrap();
    holder.verify_request_key_data(&r3, seeker_id).unwrap();
    let r4 = holder.get_response_key_data(seeker_id).unwrap();
    seeker.verify_response_key(&r4, holder_id).unwrap();
}

#[test]
fn test_end_to_end_key_delivery() {
    let key = get_unsecure_sample_secp256k1_sk();
    let h = holder_with(key);
    let s = seeker();
    assert!(!s.check_secret_key());

    run_handshake(&s, &h, "S", "H");

    assert!(s.check_secret_key());
    assert_eq!(s.secret_key().unwrap(), key);
}

#[test]
fn test_unknown_peer_rejected_at_every_round() {
    let km = holder_with(get_unsecure_sample_secp256k1_sk());
    let payload = vec![0u8; 2 * NONCE_SIZE];

    assert!(matches!(
        km.verify_auth(&[0u8; NONCE_SIZE], "stranger"),
        Err(HandshakeError::InvalidOperation)
    ));
    assert!(matches!(
        km.verify_remote_verify(&payload, "stranger"),
        Err(HandshakeError::InvalidOperation)
    ));
    assert!(matches!(
        km.verify_request_key_data(&payload, "stranger"),
        Err(HandshakeError::InvalidOperation)
    ));
    assert!(matches!(
        km.verify_response_key(&payload, "stranger"),
        Err(HandshakeError::InvalidOperation)
    ));
}

#[test]
fn test_chain_prefix_mismatch_rejected() {
    let s = seeker();
    let r1 = s.get_auth_data("H").unwrap();
    // with the identity stub, r1 is the session's round 1 nonce itself
    assert_eq!(r1.len(), NONCE_SIZE);

    // a well-formed round 2 payload chained to the wrong nonce
    let mut forged = vec![0u8; 2 * NONCE_SIZE];
    forged[0] = r1[0].wrapping_add(1);
    assert!(matches!(
        s.verify_remote_verify(&forged, "H"),
        Err(HandshakeError::InvalidOperation)
    ));

    // the correctly chained payload passes
    let mut genuine = r1.clone();
    genuine.extend_from_slice(&[9u8; NONCE_SIZE]);
    s.verify_remote_verify(&genuine, "H").unwrap();
}

#[test]
fn test_round_one_payload_must_be_nonce_sized() {
    let h = holder_with(get_unsecure_sample_secp256k1_sk());
    h.get_auth_data("S").unwrap();
    assert!(matches!(
        h.verify_auth(&[1u8; NONCE_SIZE + 1], "S"),
        Err(HandshakeError::InvalidOperation)
    ));
}

#[test]
fn test_key_gate_blocks_keyless_responder() {
    let keyless = seeker();
    let s = seeker();

    let r1 = s.get_auth_data("H").unwrap();
    keyless.get_auth_data("S").unwrap();
    keyless.verify_auth(&r1, "S").unwrap();
    let r2 = keyless.get_verify_data("S").unwrap();
    s.verify_remote_verify(&r2, "H").unwrap();
    let r3 = s.get_request_key_data("H").unwrap();
    keyless.verify_request_key_data(&r3, "S").unwrap();

    assert!(matches!(
        keyless.get_response_key_data("S"),
        Err(HandshakeError::KeyAbsent)
    ));
}

#[test]
fn test_first_delivered_key_wins() {
    let k1 = get_unsecure_sample_secp256k1_sk();
    let k2 = other_secret_key();
    assert_ne!(k1, k2);

    let s = seeker();
    let fired = Arc::new(Mutex::new(0u32));
    {
        let fired = Arc::clone(&fired);
        s.add_key_watcher(move |_| *fired.lock().unwrap() += 1);
    }

    run_handshake(&s, &holder_with(k1), "S", "H1");
    run_handshake(&s, &holder_with(k2), "S", "H2");

    assert_eq!(s.secret_key().unwrap(), k1);
    assert_eq!(*fired.lock().unwrap(), 1);
}

#[test]
fn test_watchers_fire_once_in_registration_order() {
    let key = get_unsecure_sample_secp256k1_sk();
    let s = seeker();
    let calls: Arc<Mutex<Vec<(u8, [u8; SECRET_KEY_SIZE])>>> = Arc::new(Mutex::new(Vec::new()));
    for tag in [1u8, 2] {
        let calls = Arc::clone(&calls);
        s.add_key_watcher(move |bytes| calls.lock().unwrap().push((tag, *bytes)));
    }

    run_handshake(&s, &holder_with(key), "S", "H");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, 1);
    assert_eq!(calls[1].0, 2);
    assert_eq!(calls[0].1, calls[1].1);
    assert_eq!(calls[0].1, key.secret_bytes());
}

#[test]
fn test_concurrent_sessions_stay_isolated() {
    let key = get_unsecure_sample_secp256k1_sk();
    let h = holder_with(key);
    let alice = seeker();
    let bob = seeker();

    std::thread::scope(|scope| {
        scope.spawn(|| run_handshake(&alice, &h, "alice", "H"));
        scope.spawn(|| run_handshake(&bob, &h, "bob", "H"));
    });

    assert_eq!(alice.secret_key().unwrap(), key);
    assert_eq!(bob.secret_key().unwrap(), key);
}

#[test]
fn test_cross_fed_round_two_rejected() {
    let h = holder_with(get_unsecure_sample_secp256k1_sk());
    let alice = seeker();
    let bob = seeker();

    let a1 = alice.get_auth_data("H").unwrap();
    h.get_auth_data("alice").unwrap();
    h.verify_auth(&a1, "alice").unwrap();
    let a2 = h.get_verify_data("alice").unwrap();

    let b1 = bob.get_auth_data("H").unwrap();
    h.get_auth_data("bob").unwrap();
    h.verify_auth(&b1, "bob").unwrap();
    let _b2 = h.get_verify_data("bob").unwrap();

    // alice's round 2 is chained to alice's nonce, not bob's
    assert!(matches!(
        bob.verify_remote_verify(&a2, "H"),
        Err(HandshakeError::InvalidOperation)
    ));
    // and bob's own session is still usable afterwards
    let b2 = h.get_verify_data("bob").unwrap();
    bob.verify_remote_verify(&b2, "H").unwrap();
}
