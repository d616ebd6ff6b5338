//! Fleet key manager: the attestation-bound key-provisioning handshake.
//!
//! A node holding the fleet secret key (the Holder) hands it to a freshly
//! started node without one (the Seeker) over four rounds of opaque
//! attestation reports. Each round embeds the nonce extracted from the
//! previous round's verified report, so every message is bound to the same
//! live session:
//!
//! ```text
//! round 1  Seeker -> Holder   report( a )
//! round 2  Holder -> Seeker   report( a ‖ b )
//! round 3  Seeker -> Holder   report( b ‖ c )
//! round 4  Holder -> Seeker   report( c ‖ fleet_sk )
//! ```
//!
//! Both sides run the same operation set; only `get_response_key_data`'s
//! key-presence gate makes the roles asymmetric. The supported call
//! sequences are the Seeker sequence (`get_auth_data`,
//! `verify_remote_verify`, `get_request_key_data`, `verify_response_key`)
//! and the Holder sequence (`get_auth_data`, `verify_auth`,
//! `get_verify_data`, `verify_request_key_data`, `get_response_key_data`).

use crate::attestation::AttestationBackend;

use rand::RngCore;
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Size of the per-round session nonces.
pub const NONCE_SIZE: usize = 32;
/// Size of the fleet secret key carried in the round 4 payload.
pub const SECRET_KEY_SIZE: usize = 32;
/// Sessions untouched for this long are swept on the next table access.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// Handshake failure kinds.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Session missing, round attempted out of order, nonce-chain mismatch,
    /// or malformed payload. Deliberately indistinguishable so a peer cannot
    /// probe which check failed.
    #[error("invalid operation")]
    InvalidOperation,
    /// The attestation backend rejected a report or failed to produce one.
    #[error("attestation failure: {0}")]
    Attestation(#[source] anyhow::Error),
    /// Round 4 attempted by a node holding no fleet key.
    #[error("secret key not available")]
    KeyAbsent,
}

/// Callback fired once when a key is newly installed, with the raw key bytes.
pub type KeyWatcher = dyn Fn(&[u8; SECRET_KEY_SIZE]) + Send + Sync;

/// Per-peer handshake state. Round nonces are minted at most once; a repeated
/// producer call re-issues a report over the stored nonce, so retries can
/// never desynchronize the chain.
struct Session {
    random_a: [u8; NONCE_SIZE],
    random_b: Option<[u8; NONCE_SIZE]>,
    random_c: Option<[u8; NONCE_SIZE]>,
    random_ar: Option<[u8; NONCE_SIZE]>,
    random_br: Option<[u8; NONCE_SIZE]>,
    random_cr: Option<[u8; NONCE_SIZE]>,
    last_touch: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            random_a: gen_nonce(),
            random_b: None,
            random_c: None,
            random_ar: None,
            random_br: None,
            random_cr: None,
            last_touch: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_touch = Instant::now();
    }
}

fn gen_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// Splits a verified 64-byte round payload into chain prefix and fresh half.
fn split_chained(data: &[u8]) -> Result<(&[u8], [u8; NONCE_SIZE]), HandshakeError> {
    if data.len() != 2 * NONCE_SIZE {
        return Err(HandshakeError::InvalidOperation);
    }
    let tail: [u8; NONCE_SIZE] = data[NONCE_SIZE..]
        .try_into()
        .expect("length checked above");
    Ok((&data[..NONCE_SIZE], tail))
}

/// Owns the optional fleet secret key, the handshake session table, and the
/// key watcher list.
///
/// The session table lock is held only long enough to hand out a per-session
/// lock; attestation backend calls (potentially slow hardware calls) run
/// under the session lock alone, so distinct peers handshake concurrently
/// while operations on the same session serialize.
pub struct KeyManager<A> {
    backend: A,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    secret: RwLock<Option<SecretKey>>,
    watchers: Mutex<Vec<Arc<KeyWatcher>>>,
    session_ttl: Duration,
}

impl<A: AttestationBackend> KeyManager<A> {
    pub fn new(backend: A, secret: Option<SecretKey>) -> Self {
        Self {
            backend,
            sessions: Mutex::new(HashMap::new()),
            secret: RwLock::new(secret),
            watchers: Mutex::new(Vec::new()),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Whether the fleet secret key is present. Never fails.
    pub fn check_secret_key(&self) -> bool {
        self.secret.read().unwrap().is_some()
    }

    /// Copy of the fleet secret key, if present.
    pub fn secret_key(&self) -> Option<SecretKey> {
        *self.secret.read().unwrap()
    }

    /// Installs an externally sourced key (disk load, explicit input).
    /// The first key installed for the node's lifetime is authoritative.
    pub fn install_secret_key(&self, sk: SecretKey) {
        let mut guard = self.secret.write().unwrap();
        if guard.is_some() {
            warn!("key manager already holds a secret key, keeping it");
            return;
        }
        *guard = Some(sk);
    }

    /// Registers a callback for future key installs. A key already present
    /// does not retroactively invoke the watcher.
    pub fn add_key_watcher(&self, watcher: impl Fn(&[u8; SECRET_KEY_SIZE]) + Send + Sync + 'static) {
        self.watchers.lock().unwrap().push(Arc::new(watcher));
    }

    fn normalize(peer_id: &str) -> String {
        peer_id.to_ascii_lowercase()
    }

    /// Sweeps expired sessions, then returns the peer's session, creating it
    /// when `create` is set. Sessions locked by in-flight operations are
    /// never swept.
    fn session(&self, peer_id: &str, create: bool) -> Option<Arc<Mutex<Session>>> {
        let mut table = self.sessions.lock().unwrap();
        let ttl = self.session_ttl;
        table.retain(|_, s| match s.try_lock() {
            Ok(guard) => guard.last_touch.elapsed() < ttl,
            Err(_) => true,
        });

        let key = Self::normalize(peer_id);
        if create {
            Some(Arc::clone(
                table.entry(key).or_insert_with(|| Arc::new(Mutex::new(Session::new()))),
            ))
        } else {
            table.get(&key).map(Arc::clone)
        }
    }

    fn remove_session(&self, peer_id: &str) {
        self.sessions
            .lock()
            .unwrap()
            .remove(&Self::normalize(peer_id));
    }

    /// Round 1 producer: report over this session's `random_a`, creating the
    /// session if absent. Repeat calls re-report the same nonce.
    pub fn get_auth_data(&self, peer_id: &str) -> Result<Vec<u8>, HandshakeError> {
        let session = self.session(peer_id, true).expect("created above");
        let mut s = session.lock().unwrap();
        s.touch();
        self.backend
            .generate_report(&s.random_a)
            .map_err(HandshakeError::Attestation)
    }

    /// Round 1 consumer: verify the peer's auth report and store its nonce.
    /// Requires a session (the local side establishes the slot by calling
    /// [`Self::get_auth_data`] for this peer first).
    pub fn verify_auth(&self, auth_data: &[u8], peer_id: &str) -> Result<(), HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;
        let mut s = session.lock().unwrap();
        s.touch();
        let verified = self
            .backend
            .verify_report(auth_data)
            .map_err(HandshakeError::Attestation)?;
        let nonce: [u8; NONCE_SIZE] = verified
            .user_data
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::InvalidOperation)?;
        s.random_ar = Some(nonce);
        Ok(())
    }

    /// Round 2 producer: report over `random_ar ‖ random_b`.
    pub fn get_verify_data(&self, peer_id: &str) -> Result<Vec<u8>, HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;
        let mut s = session.lock().unwrap();
        s.touch();
        let ar = s.random_ar.ok_or(HandshakeError::InvalidOperation)?;
        let b = *s.random_b.get_or_insert_with(gen_nonce);

        let mut data = Vec::with_capacity(2 * NONCE_SIZE);
        data.extend_from_slice(&ar);
        data.extend_from_slice(&b);
        self.backend
            .generate_report(&data)
            .map_err(HandshakeError::Attestation)
    }

    /// Round 2 consumer: the payload's prefix must equal this session's
    /// `random_a`; the tail becomes `random_br`.
    pub fn verify_remote_verify(
        &self,
        verify_data: &[u8],
        peer_id: &str,
    ) -> Result<(), HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;
        let mut s = session.lock().unwrap();
        s.touch();
        let verified = self
            .backend
            .verify_report(verify_data)
            .map_err(HandshakeError::Attestation)?;
        let (prefix, tail) = split_chained(&verified.user_data)?;
        if prefix != s.random_a {
            return Err(HandshakeError::InvalidOperation);
        }
        s.random_br = Some(tail);
        Ok(())
    }

    /// Round 3 producer: report over `random_br ‖ random_c`.
    pub fn get_request_key_data(&self, peer_id: &str) -> Result<Vec<u8>, HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;
        let mut s = session.lock().unwrap();
        s.touch();
        let br = s.random_br.ok_or(HandshakeError::InvalidOperation)?;
        let c = *s.random_c.get_or_insert_with(gen_nonce);

        let mut data = Vec::with_capacity(2 * NONCE_SIZE);
        data.extend_from_slice(&br);
        data.extend_from_slice(&c);
        self.backend
            .generate_report(&data)
            .map_err(HandshakeError::Attestation)
    }

    /// Round 3 consumer: prefix must equal `random_b`; tail becomes `random_cr`.
    pub fn verify_request_key_data(
        &self,
        request: &[u8],
        peer_id: &str,
    ) -> Result<(), HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;
        let mut s = session.lock().unwrap();
        s.touch();
        let b = s.random_b.ok_or(HandshakeError::InvalidOperation)?;
        let verified = self
            .backend
            .verify_report(request)
            .map_err(HandshakeError::Attestation)?;
        let (prefix, tail) = split_chained(&verified.user_data)?;
        if prefix != b {
            return Err(HandshakeError::InvalidOperation);
        }
        s.random_cr = Some(tail);
        Ok(())
    }

    /// Round 4 producer: report over `random_cr ‖ fleet_sk`. Only a node
    /// holding the key may produce this round.
    pub fn get_response_key_data(&self, peer_id: &str) -> Result<Vec<u8>, HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;
        let mut s = session.lock().unwrap();
        s.touch();
        let cr = s.random_cr.ok_or(HandshakeError::InvalidOperation)?;
        let sk = self
            .secret
            .read()
            .unwrap()
            .ok_or(HandshakeError::KeyAbsent)?;

        let mut data = Zeroizing::new(Vec::with_capacity(2 * NONCE_SIZE));
        data.extend_from_slice(&cr);
        data.extend_from_slice(&sk.secret_bytes());
        self.backend
            .generate_report(&data)
            .map_err(HandshakeError::Attestation)
    }

    /// Round 4 consumer: prefix must equal `random_c`; the tail is imported
    /// as the fleet secret key. The first key installed wins; a later
    /// delivery is a logged no-op. Watchers run after all locks are
    /// released, so they may call back into the key manager.
    pub fn verify_response_key(
        &self,
        response: &[u8],
        peer_id: &str,
    ) -> Result<(), HandshakeError> {
        let session = self
            .session(peer_id, false)
            .ok_or(HandshakeError::InvalidOperation)?;

        let installed: Option<Zeroizing<[u8; SECRET_KEY_SIZE]>> = {
            let mut s = session.lock().unwrap();
            s.touch();
            let c = s.random_c.ok_or(HandshakeError::InvalidOperation)?;
            let verified = self
                .backend
                .verify_report(response)
                .map_err(HandshakeError::Attestation)?;
            let (prefix, key_bytes) = split_chained(&verified.user_data)?;
            if prefix != c {
                return Err(HandshakeError::InvalidOperation);
            }
            let key_bytes = Zeroizing::new(key_bytes);
            let sk = SecretKey::from_slice(&key_bytes[..])
                .map_err(|_| HandshakeError::InvalidOperation)?;

            let mut guard = self.secret.write().unwrap();
            if guard.is_some() {
                warn!("key manager already holds a secret key, skipping delivered key");
                None
            } else {
                *guard = Some(sk);
                info!("key manager installed fleet secret key");
                Some(key_bytes)
            }
        };

        // delivery completed, the session has served its purpose
        self.remove_session(peer_id);

        if let Some(key_bytes) = installed {
            let watchers: Vec<Arc<KeyWatcher>> = self.watchers.lock().unwrap().clone();
            for watcher in &watchers {
                watcher(&key_bytes);
            }
        }
        Ok(())
    }
}
