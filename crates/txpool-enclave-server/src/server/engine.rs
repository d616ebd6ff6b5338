//! The node's execution engine: serves API calls after http parsing,
//! controls the central resources (key manager, pool, block filler).

use jsonrpsee::core::{async_trait, RpcResult};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::sync::Arc;
use tracing::warn;

use crate::attestation::AttestationBackend;
use crate::blockfill::BlockFiller;
use crate::key_manager::{HandshakeError, KeyManager};
use crate::pool::TxPool;
use crate::server::provision;

use txpool_enclave::request_types::*;
use txpool_enclave::rpc::TrustedPoolApiServer;
use txpool_enclave::{
    ecies_decrypt, ecies_encrypt, rpc_attestation_error, rpc_bad_argument_error,
    rpc_internal_server_error, rpc_invalid_operation_error, rpc_key_absent_error,
};

use alloy_primitives::{Address, B256};

fn handshake_error(e: HandshakeError) -> jsonrpsee::types::ErrorObjectOwned {
    match e {
        HandshakeError::InvalidOperation => rpc_invalid_operation_error(),
        HandshakeError::Attestation(e) => rpc_attestation_error(e),
        HandshakeError::KeyAbsent => rpc_key_absent_error(),
    }
}

pub struct TrustedPoolEngine<A: AttestationBackend> {
    key_manager: Arc<KeyManager<A>>,
    pool: Arc<TxPool>,
    filler: Arc<BlockFiller>,
    /// Identifier this node introduces itself with during key provisioning.
    peer_id: String,
}

impl<A: AttestationBackend> TrustedPoolEngine<A> {
    pub fn new(
        key_manager: Arc<KeyManager<A>>,
        pool: Arc<TxPool>,
        filler: Arc<BlockFiller>,
        peer_id: impl Into<String>,
    ) -> Self {
        Self {
            key_manager,
            pool,
            filler,
            peer_id: peer_id.into(),
        }
    }

    pub fn key_manager(&self) -> &Arc<KeyManager<A>> {
        &self.key_manager
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn filler(&self) -> &Arc<BlockFiller> {
        &self.filler
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.key_manager
            .secret_key()
            .map(|sk| PublicKey::from_secret_key(&Secp256k1::new(), &sk))
    }

    fn fleet_sk(&self) -> Result<SecretKey, jsonrpsee::types::ErrorObjectOwned> {
        self.key_manager.secret_key().ok_or_else(rpc_key_absent_error)
    }

    /// Opens one hex encoded fleet-key envelope into a pool transaction.
    fn open_envelope(&self, crypted: &str, sk: &SecretKey) -> Result<PoolTransaction, String> {
        let envelope = hex::decode(crypted).map_err(|e| format!("invalid hex: {e}"))?;
        let plain = ecies_decrypt(sk, &envelope).map_err(|e| format!("decryption failed: {e}"))?;
        serde_json::from_slice(&plain).map_err(|e| format!("invalid transaction: {e}"))
    }

    fn add_crypted(&self, req: AddCryptedTxsRequest, local: bool) -> RpcResult<AddCryptedTxsResponse> {
        let sk = self.fleet_sk()?;
        let mut results: Vec<AddCryptedTxResult> = Vec::with_capacity(req.crypted_txs.len());
        let mut decoded: Vec<(usize, PoolTransaction)> = Vec::new();
        for (i, crypted) in req.crypted_txs.iter().enumerate() {
            match self.open_envelope(crypted, &sk) {
                Ok(tx) => {
                    results.push(AddCryptedTxResult {
                        hash: tx.hash(),
                        error: None,
                    });
                    decoded.push((i, tx));
                }
                Err(e) => {
                    warn!("rejecting crypted transaction: {e}");
                    results.push(AddCryptedTxResult {
                        hash: B256::ZERO,
                        error: Some(e),
                    });
                }
            }
        }

        let errors = self
            .pool
            .add_txs(decoded.iter().map(|(_, tx)| tx.clone()).collect(), local);
        for ((i, _), error) in decoded.iter().zip(errors) {
            if let Some(e) = error {
                results[*i].error = Some(e.to_string());
            }
        }
        Ok(AddCryptedTxsResponse { results })
    }
}

#[async_trait]
impl<A: AttestationBackend> TrustedPoolApiServer for TrustedPoolEngine<A> {
    async fn health_check(&self) -> RpcResult<String> {
        Ok("OK".into())
    }

    async fn service_ready(&self) -> RpcResult<ServiceReadyResponse> {
        Ok(ServiceReadyResponse {
            ready: self.key_manager.check_secret_key(),
        })
    }

    async fn check_secret_key(&self) -> RpcResult<bool> {
        Ok(self.key_manager.check_secret_key())
    }

    async fn get_public_key(&self) -> RpcResult<Option<PublicKey>> {
        Ok(self.public_key())
    }

    async fn pool_stats(&self) -> RpcResult<PoolStatsResponse> {
        let (pending, queued) = self.pool.stats();
        Ok(PoolStatsResponse {
            pending: pending as u64,
            queued: queued as u64,
        })
    }

    async fn pool_content(&self) -> RpcResult<PoolContentResponse> {
        let (pending, queued) = self.pool.content();
        Ok(PoolContentResponse { pending, queued })
    }

    async fn pool_content_from(&self, address: Address) -> RpcResult<PoolContentResponse> {
        let (pending, queued) = self.pool.content_from(&address);
        let wrap = |txs: Vec<PoolTransaction>| {
            if txs.is_empty() {
                vec![]
            } else {
                vec![AccountContent { address, txs }]
            }
        };
        Ok(PoolContentResponse {
            pending: wrap(pending),
            queued: wrap(queued),
        })
    }

    async fn pool_pending(&self) -> RpcResult<PoolPendingResponse> {
        Ok(PoolPendingResponse {
            pending: self.pool.pending(),
        })
    }

    async fn pool_locals(&self) -> RpcResult<PoolLocalsResponse> {
        Ok(PoolLocalsResponse {
            addresses: self.pool.locals(),
        })
    }

    async fn pending_nonce(&self, req: PendingNonceRequest) -> RpcResult<PendingNonceResponse> {
        Ok(PendingNonceResponse {
            nonce: self.pool.nonce(&req.address),
        })
    }

    async fn pool_set_price(&self, req: SetGasPriceRequest) -> RpcResult<()> {
        self.pool.set_gas_price(req.price);
        Ok(())
    }

    async fn pool_gas_price(&self) -> RpcResult<GasPriceResponse> {
        Ok(GasPriceResponse {
            price: self.pool.gas_price(),
        })
    }

    async fn add_local_txs(&self, req: AddTxsRequest) -> RpcResult<AddTxsResponse> {
        let errors = self.pool.add_locals(req.txs);
        Ok(AddTxsResponse {
            errors: errors.into_iter().map(|e| e.map(|e| e.to_string())).collect(),
        })
    }

    async fn add_remote_txs(&self, req: AddTxsRequest) -> RpcResult<AddTxsResponse> {
        let errors = self.pool.add_remotes(req.txs);
        Ok(AddTxsResponse {
            errors: errors.into_iter().map(|e| e.map(|e| e.to_string())).collect(),
        })
    }

    async fn add_local_crypted_txs(
        &self,
        req: AddCryptedTxsRequest,
    ) -> RpcResult<AddCryptedTxsResponse> {
        self.add_crypted(req, true)
    }

    async fn add_remote_crypted_txs(
        &self,
        req: AddCryptedTxsRequest,
    ) -> RpcResult<AddCryptedTxsResponse> {
        self.add_crypted(req, false)
    }

    async fn tx_status(&self, req: TxStatusRequest) -> RpcResult<TxStatusResponse> {
        Ok(TxStatusResponse {
            status: self.pool.status(&req.hashes),
        })
    }

    async fn tx_get(&self, req: TxGetRequest) -> RpcResult<TxGetResponse> {
        Ok(TxGetResponse {
            tx: self.pool.get(&req.hash),
        })
    }

    async fn tx_has(&self, req: TxHasRequest) -> RpcResult<TxHasResponse> {
        Ok(TxHasResponse {
            has: self.pool.has(&req.hash),
        })
    }

    async fn fill_block(&self, req: FillBlockRequest) -> RpcResult<FillBlockResponse> {
        self.filler
            .set_block_proof(req.parent_hash, req.block_time, &req.txs);
        Ok(FillBlockResponse {})
    }

    async fn block_fill_records(&self) -> RpcResult<BlockFillRecordsResponse> {
        Ok(BlockFillRecordsResponse {
            records: self.filler.records(),
        })
    }

    async fn crypt(&self, req: CryptRequest) -> RpcResult<CryptResponse> {
        let pk = self.public_key().ok_or_else(rpc_key_absent_error)?;
        let crypted = ecies_encrypt(&pk, &req.data).map_err(rpc_internal_server_error)?;
        Ok(CryptResponse { crypted })
    }

    async fn decrypt(&self, req: DecryptRequest) -> RpcResult<DecryptResponse> {
        let sk = self.fleet_sk()?;
        // a failed decrypt means the caller's envelope was malformed or
        // sealed to another key
        let decrypted = ecies_decrypt(&sk, &req.data).map_err(rpc_bad_argument_error)?;
        Ok(DecryptResponse { decrypted })
    }

    async fn key_exchange_auth(&self, req: KeyAuthRequest) -> RpcResult<KeyAuthResponse> {
        let km = &self.key_manager;
        // establish the session slot for this peer before consuming round 1
        km.get_auth_data(&req.peer_id).map_err(handshake_error)?;
        km.verify_auth(&req.report, &req.peer_id)
            .map_err(handshake_error)?;
        let report = km.get_verify_data(&req.peer_id).map_err(handshake_error)?;
        Ok(KeyAuthResponse { report })
    }

    async fn key_exchange_request(
        &self,
        req: KeyRequestRequest,
    ) -> RpcResult<KeyRequestResponse> {
        let km = &self.key_manager;
        km.verify_request_key_data(&req.report, &req.peer_id)
            .map_err(handshake_error)?;
        let report = km
            .get_response_key_data(&req.peer_id)
            .map_err(handshake_error)?;
        Ok(KeyRequestResponse { report })
    }

    async fn provision_key(&self, req: ProvisionKeyRequest) -> RpcResult<ProvisionKeyResponse> {
        provision::provision_from_holder(
            &self.key_manager,
            &self.peer_id,
            &req.holder_url,
            &req.holder_peer_id,
        )
        .await
        .map_err(rpc_internal_server_error)?;
        Ok(ProvisionKeyResponse {})
    }
}
