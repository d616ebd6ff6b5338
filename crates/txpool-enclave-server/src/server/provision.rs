//! Seeker-side driver for key provisioning.
//!
//! Runs the four handshake rounds against a Holder node over two JSON-RPC
//! round-trips. On success the key manager has installed the fleet secret
//! key and fired its key watchers.

use anyhow::{Context, Result};
use jsonrpsee::http_client::HttpClientBuilder;
use tracing::info;

use crate::attestation::AttestationBackend;
use crate::key_manager::KeyManager;
use txpool_enclave::rpc::TrustedPoolApiClient;
use txpool_enclave::{KeyAuthRequest, KeyRequestRequest};

pub async fn provision_from_holder<A: AttestationBackend>(
    key_manager: &KeyManager<A>,
    local_peer_id: &str,
    holder_url: &str,
    holder_peer_id: &str,
) -> Result<()> {
    let client = HttpClientBuilder::default()
        .build(holder_url)
        .with_context(|| format!("failed to connect holder at {holder_url}"))?;

    // rounds 1 and 2
    let report = key_manager
        .get_auth_data(holder_peer_id)
        .context("producing auth report")?;
    let auth = client
        .key_exchange_auth(KeyAuthRequest {
            peer_id: local_peer_id.to_string(),
            report,
        })
        .await
        .context("keyExchangeAuth round-trip")?;
    key_manager
        .verify_remote_verify(&auth.report, holder_peer_id)
        .context("verifying holder verify report")?;

    // rounds 3 and 4
    let report = key_manager
        .get_request_key_data(holder_peer_id)
        .context("producing key request report")?;
    let response = client
        .key_exchange_request(KeyRequestRequest {
            peer_id: local_peer_id.to_string(),
            report,
        })
        .await
        .context("keyExchangeRequest round-trip")?;
    key_manager
        .verify_response_key(&response.report, holder_peer_id)
        .context("verifying key response report")?;

    info!(holder = holder_url, "fleet key provisioned from holder");
    Ok(())
}
