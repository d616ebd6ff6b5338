//! Encrypted-at-rest persistence for the fleet secret key.
//!
//! The key file is a JSON document sealed with AES-256-GCM; a random nonce
//! is prepended to the ciphertext. The sealing key is derived from a sealing
//! secret via HKDF-SHA256, standing in for hardware sealing.

use aes_gcm::{Aes256Gcm, Key};
use anyhow::{anyhow, Context, Result};
use hkdf::Hkdf;
use rand::RngCore;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use txpool_enclave::{aes_decrypt, aes_encrypt, AESGCM_NONCE_SIZE};

const SEALING_SALT: &[u8] = b"txpool-keystore-sealing-v1";

/// On-disk document, sealed before it touches the filesystem.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    #[serde(rename = "priv-key")]
    priv_key: String,
}

/// Derives the AES sealing key from a sealing secret.
pub fn derive_sealing_key(sealing_secret: &[u8]) -> Key<Aes256Gcm> {
    let hk = Hkdf::<Sha256>::new(Some(SEALING_SALT), sealing_secret);
    let mut okm = [0u8; 32];
    hk.expand(b"key-file-sealing", &mut okm)
        .expect("32 is a valid length for Sha256 to output");
    okm.into()
}

/// Sealed key file at a fixed path.
#[derive(Debug)]
pub struct Keystore {
    path: PathBuf,
    sealing_key: Key<Aes256Gcm>,
}

impl Keystore {
    pub fn new(path: impl Into<PathBuf>, sealing_key: Key<Aes256Gcm>) -> Self {
        Self {
            path: path.into(),
            sealing_key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads and unseals the key file.
    pub fn load(&self) -> Result<SecretKey> {
        let sealed = fs::read(&self.path)
            .with_context(|| format!("failed to read key file {}", self.path.display()))?;
        if sealed.len() < AESGCM_NONCE_SIZE {
            return Err(anyhow!("key file too small to contain a nonce"));
        }
        let nonce: [u8; AESGCM_NONCE_SIZE] = sealed[..AESGCM_NONCE_SIZE]
            .try_into()
            .expect("length checked above");
        let plaintext = aes_decrypt(&self.sealing_key, &sealed[AESGCM_NONCE_SIZE..], &nonce)?;

        let file: KeyFile = serde_json::from_slice(&plaintext)?;
        let bytes = hex::decode(&file.priv_key)?;
        let sk = SecretKey::from_slice(&bytes)?;
        info!("loaded fleet secret key from {}", self.path.display());
        Ok(sk)
    }

    /// Seals and writes the key file.
    pub fn save(&self, sk: &SecretKey) -> Result<()> {
        let file = KeyFile {
            priv_key: hex::encode(sk.secret_bytes()),
        };
        let plaintext = serde_json::to_vec(&file)?;

        let mut nonce = [0u8; AESGCM_NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = aes_encrypt(&self.sealing_key, &plaintext, &nonce)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = Vec::with_capacity(AESGCM_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        fs::write(&self.path, out)
            .with_context(|| format!("failed to write key file {}", self.path.display()))?;
        Ok(())
    }

    /// Generates a fresh key, persists it, and returns it.
    pub fn generate(&self) -> Result<SecretKey> {
        let secp = secp256k1::Secp256k1::new();
        let (sk, _) = secp.generate_keypair(&mut secp256k1::rand::rngs::OsRng);
        self.save(&sk)?;
        info!("generated fleet secret key at {}", self.path.display());
        Ok(sk)
    }
}
