//! Attestation backend seam.
//!
//! The key manager treats attestation as an opaque oracle: it hands user data
//! to [`AttestationBackend::generate_report`] and gets back a blob only the
//! matching `verify_report` can open. Which code measurements are trusted is
//! a policy decision owned by the backend, never by the key manager.

use anyhow::{anyhow, Result};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use txpool_enclave::get_unsecure_sample_secp256k1_sk;

/// Outcome of verifying an attestation report.
#[derive(Debug, Clone)]
pub struct VerifiedReport {
    /// The user data the producer bound into the report.
    pub user_data: Vec<u8>,
    /// Code measurement of the producing enclave.
    pub measurement: [u8; 32],
}

/// Hardware-backed (or stand-in) report generation and verification.
pub trait AttestationBackend: Send + Sync + 'static {
    /// Binds `user_data` to the caller's code identity and signs it.
    fn generate_report(&self, user_data: &[u8]) -> Result<Vec<u8>>;

    /// Validates a report's signature and code-identity policy.
    fn verify_report(&self, report: &[u8]) -> Result<VerifiedReport>;
}

/// Identity transform backend for deterministic tests: the report *is* the
/// user data and every report verifies.
#[derive(Debug, Clone, Default)]
pub struct MockAttestation;

impl AttestationBackend for MockAttestation {
    fn generate_report(&self, user_data: &[u8]) -> Result<Vec<u8>> {
        Ok(user_data.to_vec())
    }

    fn verify_report(&self, report: &[u8]) -> Result<VerifiedReport> {
        Ok(VerifiedReport {
            user_data: report.to_vec(),
            measurement: [0u8; 32],
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DevReport {
    user_data: String,
    measurement: String,
    signature: String,
}

/// Development stand-in for the hardware quote path: reports are secp256k1
/// signatures over `sha256(measurement ‖ user_data)` under a fleet-wide dev
/// key, and verification enforces a static measurement. Not a security
/// boundary; real deployments plug a hardware adapter into the same trait.
#[derive(Debug, Clone)]
pub struct DevAttestation {
    sk: SecretKey,
    pk: PublicKey,
    measurement: [u8; 32],
}

impl Default for DevAttestation {
    fn default() -> Self {
        Self::new()
    }
}

impl DevAttestation {
    pub fn new() -> Self {
        let sk = get_unsecure_sample_secp256k1_sk();
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);
        let measurement: [u8; 32] = Sha256::digest(b"txpool-enclave-dev-measurement").into();
        Self { sk, pk, measurement }
    }

    fn digest(&self, user_data: &[u8]) -> Message {
        let mut hasher = Sha256::new();
        hasher.update(self.measurement);
        hasher.update(user_data);
        let hash: [u8; 32] = hasher.finalize().into();
        Message::from_digest(hash)
    }
}

impl AttestationBackend for DevAttestation {
    fn generate_report(&self, user_data: &[u8]) -> Result<Vec<u8>> {
        let secp = Secp256k1::signing_only();
        let signature = secp.sign_ecdsa(&self.digest(user_data), &self.sk);
        let report = DevReport {
            user_data: hex::encode(user_data),
            measurement: hex::encode(self.measurement),
            signature: hex::encode(signature.serialize_compact()),
        };
        Ok(serde_json::to_vec(&report)?)
    }

    fn verify_report(&self, report: &[u8]) -> Result<VerifiedReport> {
        let report: DevReport =
            serde_json::from_slice(report).map_err(|e| anyhow!("malformed report: {e}"))?;
        let user_data = hex::decode(&report.user_data)?;
        let measurement: [u8; 32] = hex::decode(&report.measurement)?
            .try_into()
            .map_err(|_| anyhow!("malformed measurement"))?;
        if measurement != self.measurement {
            return Err(anyhow!("untrusted code measurement"));
        }

        let signature =
            secp256k1::ecdsa::Signature::from_compact(&hex::decode(&report.signature)?)?;
        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&self.digest(&user_data), &signature, &self.pk)
            .map_err(|e| anyhow!("report signature invalid: {e}"))?;

        Ok(VerifiedReport { user_data, measurement })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_report_round_trip() {
        let backend = DevAttestation::new();
        let report = backend.generate_report(b"some user data").unwrap();
        let verified = backend.verify_report(&report).unwrap();
        assert_eq!(verified.user_data, b"some user data");
        assert_eq!(verified.measurement, backend.measurement);
    }

    #[test]
    fn test_dev_report_rejects_tampered_user_data() {
        let backend = DevAttestation::new();
        let report = backend.generate_report(b"original").unwrap();
        let mut parsed: serde_json::Value = serde_json::from_slice(&report).unwrap();
        parsed["user_data"] = serde_json::Value::String(hex::encode(b"tampered"));
        let tampered = serde_json::to_vec(&parsed).unwrap();
        assert!(backend.verify_report(&tampered).is_err());
    }

    #[test]
    fn test_dev_report_rejects_garbage() {
        let backend = DevAttestation::new();
        assert!(backend.verify_report(b"not a report").is_err());
    }
}
