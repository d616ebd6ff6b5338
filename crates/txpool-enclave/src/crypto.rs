//! Crypto helpers shared between the node and its clients.
//!
//! The envelope format produced by [`ecies_encrypt`] is
//! `ephemeral_pk (33) ‖ nonce (12) ‖ aes-256-gcm ciphertext`, decryptable by
//! any party holding the fleet secret key.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Key,
};
use anyhow::anyhow;
use hkdf::Hkdf;
use rand::RngCore;
use secp256k1::{ecdh::SharedSecret, PublicKey, Secp256k1, SecretKey};
use sha2::Sha256;
use std::str::FromStr;

/// AES-GCM nonce size in bytes.
pub const AESGCM_NONCE_SIZE: usize = 12;
/// Serialized compressed secp256k1 public key size in bytes.
pub const COMPRESSED_PK_SIZE: usize = 33;

/// Encrypts plaintext using AES-256 GCM with a 96-bit nonce.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn aes_encrypt(
    key: &Key<Aes256Gcm>,
    plaintext: &[u8],
    nonce: &[u8; AESGCM_NONCE_SIZE],
) -> anyhow::Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key);
    cipher
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|e| anyhow!("AES encryption failed: {:?}", e))
}

/// Decrypts ciphertext using AES-256 GCM with a 96-bit nonce.
///
/// # Errors
/// Returns an error if decryption fails (wrong key, corrupted data).
pub fn aes_decrypt(
    key: &Key<Aes256Gcm>,
    ciphertext: &[u8],
    nonce: &[u8; AESGCM_NONCE_SIZE],
) -> anyhow::Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key);
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {:?}", e))
}

/// Derives an AES-256 key from an ECDH shared secret using HKDF-SHA256.
pub fn derive_aes_key(shared_secret: &SharedSecret) -> Result<Key<Aes256Gcm>, hkdf::InvalidLength> {
    let hk = Hkdf::<Sha256>::new(None, &shared_secret.secret_bytes());
    let mut okm = [0u8; 32];
    hk.expand(b"txpool-envelope-key", &mut okm)?;
    Ok(*Key::<Aes256Gcm>::from_slice(&okm))
}

/// Encrypts data for the holder of the secret key matching `pk`.
///
/// An ephemeral keypair is generated per call; the ephemeral public key and
/// the AES nonce are prepended to the ciphertext so the receiver can
/// reconstruct the shared secret.
pub fn ecies_encrypt(pk: &PublicKey, data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let secp = Secp256k1::new();
    let (eph_sk, eph_pk) = secp.generate_keypair(&mut secp256k1::rand::rngs::OsRng);

    let shared_secret = SharedSecret::new(pk, &eph_sk);
    let aes_key =
        derive_aes_key(&shared_secret).map_err(|e| anyhow!("Error deriving AES key: {:?}", e))?;

    let mut nonce = [0u8; AESGCM_NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    let ciphertext = aes_encrypt(&aes_key, data, &nonce)?;

    let mut out = Vec::with_capacity(COMPRESSED_PK_SIZE + AESGCM_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&eph_pk.serialize());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts an envelope produced by [`ecies_encrypt`] using the secret key.
pub fn ecies_decrypt(sk: &SecretKey, data: &[u8]) -> anyhow::Result<Vec<u8>> {
    if data.len() < COMPRESSED_PK_SIZE + AESGCM_NONCE_SIZE {
        anyhow::bail!("envelope too short");
    }
    let eph_pk = PublicKey::from_slice(&data[..COMPRESSED_PK_SIZE])
        .map_err(|e| anyhow!("bad ephemeral public key: {:?}", e))?;
    let nonce: [u8; AESGCM_NONCE_SIZE] = data
        [COMPRESSED_PK_SIZE..COMPRESSED_PK_SIZE + AESGCM_NONCE_SIZE]
        .try_into()
        .expect("slice length checked above");
    let ciphertext = &data[COMPRESSED_PK_SIZE + AESGCM_NONCE_SIZE..];

    let shared_secret = SharedSecret::new(&eph_pk, sk);
    let aes_key =
        derive_aes_key(&shared_secret).map_err(|e| anyhow!("Error deriving AES key: {:?}", e))?;
    aes_decrypt(&aes_key, ciphertext, &nonce)
}

/// Returns a sample secp256k1 secret key for testing purposes.
pub fn get_unsecure_sample_secp256k1_sk() -> secp256k1::SecretKey {
    secp256k1::SecretKey::from_str(
        "311d54d3bf8359c70827122a44a7b4458733adce3c51c6b59d9acfce85e07505",
    )
    .unwrap()
}

/// Returns a sample secp256k1 public key for testing purposes.
pub fn get_unsecure_sample_secp256k1_pk() -> secp256k1::PublicKey {
    secp256k1::PublicKey::from_str(
        "028e76821eb4d77fd30223ca971c49738eb5b5b71eabe93f96b348fdce788ae5a0",
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecies_round_trip() {
        let sk = get_unsecure_sample_secp256k1_sk();
        let pk = get_unsecure_sample_secp256k1_pk();

        let plaintext = b"trusted pool payload".to_vec();
        let envelope = ecies_encrypt(&pk, &plaintext).unwrap();
        assert_ne!(envelope, plaintext);

        let decrypted = ecies_decrypt(&sk, &envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ecies_wrong_key_fails() {
        let pk = get_unsecure_sample_secp256k1_pk();
        let envelope = ecies_encrypt(&pk, b"data").unwrap();

        let secp = Secp256k1::new();
        let (other_sk, _) = secp.generate_keypair(&mut secp256k1::rand::rngs::OsRng);
        assert!(ecies_decrypt(&other_sk, &envelope).is_err());
    }

    #[test]
    fn test_ecies_rejects_truncated_envelope() {
        let sk = get_unsecure_sample_secp256k1_sk();
        assert!(ecies_decrypt(&sk, &[0u8; 16]).is_err());
    }
}
