//! JSON-RPC traits for the trusted pool node's server and clients

use anyhow::Result;
use jsonrpsee::core::{RpcResult, SubscriptionResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::Methods;
use std::net::SocketAddr;
use tracing::info;

use crate::request_types::chain::{
    BlockFillRecordsResponse, FillBlockRequest, FillBlockResponse,
};
use crate::request_types::crypt::{CryptRequest, CryptResponse, DecryptRequest, DecryptResponse};
use crate::request_types::handshake::{
    KeyAuthRequest, KeyAuthResponse, KeyRequestRequest, KeyRequestResponse, ProvisionKeyRequest,
    ProvisionKeyResponse, ServiceReadyResponse,
};
use crate::request_types::pool::{
    AddCryptedTxsRequest, AddCryptedTxsResponse, AddTxsRequest, AddTxsResponse, GasPriceResponse,
    NewTxsNotification, PendingNonceRequest, PendingNonceResponse, PoolContentResponse,
    PoolLocalsResponse, PoolPendingResponse, PoolStatsResponse, SetGasPriceRequest, TxGetRequest,
    TxGetResponse, TxHasRequest, TxHasResponse, TxStatusRequest, TxStatusResponse,
};

use alloy_primitives::Address;

/// Common scaffolding for anything that can be started as a JSON-RPC server.
pub trait BuildableServer {
    fn addr(&self) -> SocketAddr;
    fn methods(self) -> Methods;
    async fn start(self) -> Result<ServerHandle>;
    async fn start_rpc_server(self) -> Result<ServerHandle>
    where
        Self: Sized,
    {
        let addr = self.addr();
        let rpc_server = ServerBuilder::new().build(addr).await?;
        let module = self.methods();
        let server_handle = rpc_server.start(module);
        info!(target: "rpc::txpool", "Server started at {}", addr);
        Ok(server_handle)
    }
}

#[rpc(client, server)]
pub trait TrustedPoolApi {
    /// Health check endpoint that returns "OK" if service is running
    #[method(name = "healthCheck")]
    async fn health_check(&self) -> RpcResult<String>;

    /// Readiness probe: true once the fleet secret key is installed
    #[method(name = "serviceReady")]
    async fn service_ready(&self) -> RpcResult<ServiceReadyResponse>;

    /// Whether the fleet secret key is present (no details beyond the bit)
    #[method(name = "checkSecretKey")]
    async fn check_secret_key(&self) -> RpcResult<bool>;

    /// The fleet public key, once provisioned
    #[method(name = "getPublicKey")]
    async fn get_public_key(&self) -> RpcResult<Option<secp256k1::PublicKey>>;

    // ---- pool operations ----

    /// Pending/queued counters
    #[method(name = "poolStats")]
    async fn pool_stats(&self) -> RpcResult<PoolStatsResponse>;

    /// Full pool content grouped by account
    #[method(name = "poolContent")]
    async fn pool_content(&self) -> RpcResult<PoolContentResponse>;

    /// Pool content of a single account
    #[method(name = "poolContentFrom")]
    async fn pool_content_from(&self, address: Address) -> RpcResult<PoolContentResponse>;

    /// Pending (executable) transactions grouped by account
    #[method(name = "poolPending")]
    async fn pool_pending(&self) -> RpcResult<PoolPendingResponse>;

    /// Accounts with locally submitted transactions
    #[method(name = "poolLocals")]
    async fn pool_locals(&self) -> RpcResult<PoolLocalsResponse>;

    /// Next executable nonce for an account, including pending transactions
    #[method(name = "pendingNonce")]
    async fn pending_nonce(&self, req: PendingNonceRequest) -> RpcResult<PendingNonceResponse>;

    /// Set the gas price floor for remote transactions
    #[method(name = "poolSetPrice")]
    async fn pool_set_price(&self, req: SetGasPriceRequest) -> RpcResult<()>;

    /// Current gas price floor
    #[method(name = "poolGasPrice")]
    async fn pool_gas_price(&self) -> RpcResult<GasPriceResponse>;

    /// Add plaintext transactions with local (operator) provenance
    #[method(name = "addLocalTxs")]
    async fn add_local_txs(&self, req: AddTxsRequest) -> RpcResult<AddTxsResponse>;

    /// Add plaintext transactions with remote provenance
    #[method(name = "addRemoteTxs")]
    async fn add_remote_txs(&self, req: AddTxsRequest) -> RpcResult<AddTxsResponse>;

    /// Add fleet-key-encrypted transactions with local provenance
    #[method(name = "addLocalCryptedTxs")]
    async fn add_local_crypted_txs(
        &self,
        req: AddCryptedTxsRequest,
    ) -> RpcResult<AddCryptedTxsResponse>;

    /// Add fleet-key-encrypted transactions with remote provenance
    #[method(name = "addRemoteCryptedTxs")]
    async fn add_remote_crypted_txs(
        &self,
        req: AddCryptedTxsRequest,
    ) -> RpcResult<AddCryptedTxsResponse>;

    /// Status of each queried transaction hash
    #[method(name = "txStatus")]
    async fn tx_status(&self, req: TxStatusRequest) -> RpcResult<TxStatusResponse>;

    /// Look up a pooled transaction by hash
    #[method(name = "txGet")]
    async fn tx_get(&self, req: TxGetRequest) -> RpcResult<TxGetResponse>;

    /// Whether the pool currently holds the given hash
    #[method(name = "txHas")]
    async fn tx_has(&self, req: TxHasRequest) -> RpcResult<TxHasResponse>;

    // ---- block-proof reconciliation ----

    /// Register the transaction set handed to a block builder
    #[method(name = "fillBlock")]
    async fn fill_block(&self, req: FillBlockRequest) -> RpcResult<FillBlockResponse>;

    /// Reconciliation records of arrived blocks against registered sets
    #[method(name = "blockFillRecords")]
    async fn block_fill_records(&self) -> RpcResult<BlockFillRecordsResponse>;

    // ---- fleet-key envelope operations ----

    /// Encrypt data under the fleet public key
    #[method(name = "crypt")]
    async fn crypt(&self, req: CryptRequest) -> RpcResult<CryptResponse>;

    /// Decrypt a fleet-key envelope
    #[method(name = "decrypt")]
    async fn decrypt(&self, req: DecryptRequest) -> RpcResult<DecryptResponse>;

    // ---- key-provisioning transport ----

    /// Handshake rounds 1+2: verify the Seeker's auth report, answer with
    /// this node's verify report
    #[method(name = "keyExchangeAuth")]
    async fn key_exchange_auth(&self, req: KeyAuthRequest) -> RpcResult<KeyAuthResponse>;

    /// Handshake rounds 3+4: verify the Seeker's key request, answer with the
    /// key response report
    #[method(name = "keyExchangeRequest")]
    async fn key_exchange_request(&self, req: KeyRequestRequest)
        -> RpcResult<KeyRequestResponse>;

    /// Operator trigger: run the Seeker sequence against a Holder node
    #[method(name = "provisionKey")]
    async fn provision_key(&self, req: ProvisionKeyRequest) -> RpcResult<ProvisionKeyResponse>;
}

/// Subscription surface, kept separate so HTTP clients still get a full
/// [`TrustedPoolApiClient`] implementation; only WebSocket clients subscribe.
#[rpc(server)]
pub trait TrustedPoolSubscriptionApi {
    /// Stream newly admitted transactions as fleet-key envelopes
    #[subscription(name = "subscribeNewTransactions", item = NewTxsNotification)]
    async fn subscribe_new_transactions(&self) -> SubscriptionResult;
}
