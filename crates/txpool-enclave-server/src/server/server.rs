use crate::attestation::AttestationBackend;
use crate::blockfill::BlockFiller;
use crate::key_manager::KeyManager;
use crate::pool::TxPool;
use crate::server::engine::TrustedPoolEngine;

use txpool_enclave::request_types::*;
use txpool_enclave::rpc::{
    BuildableServer, TrustedPoolApiServer, TrustedPoolSubscriptionApiServer,
};
use txpool_enclave::{
    ecies_encrypt, POOL_DEFAULT_ENDPOINT_IP, POOL_DEFAULT_ENDPOINT_PORT,
};

use anyhow::{anyhow, Result};
use jsonrpsee::core::server::{PendingSubscriptionSink, SubscriptionMessage};
use jsonrpsee::core::{async_trait, RpcResult, SubscriptionResult};
use jsonrpsee::server::ServerHandle;
use jsonrpsee::Methods;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use alloy_primitives::Address;

/// The main server struct, with everything needed to run.
/// Can be constructed with the [`TrustedPoolServerBuilder`]
/// and started with the inherited [`start_rpc_server`] method
pub struct TrustedPoolServer<A: AttestationBackend> {
    /// The address to listen on
    addr: SocketAddr,
    /// The main execution engine holding key manager, pool, and block filler
    inner: Arc<TrustedPoolEngine<A>>,
}

impl<A: AttestationBackend> Clone for TrustedPoolServer<A> {
    fn clone(&self) -> Self {
        Self {
            addr: self.addr,
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A builder that lets us configure the server
pub struct TrustedPoolServerBuilder<A: AttestationBackend> {
    addr: Option<SocketAddr>,
    key_manager: Option<Arc<KeyManager<A>>>,
    pool: Option<Arc<TxPool>>,
    filler: Option<Arc<BlockFiller>>,
    peer_id: Option<String>,
}

impl<A: AttestationBackend> Default for TrustedPoolServerBuilder<A> {
    fn default() -> Self {
        Self {
            addr: Some(SocketAddr::new(
                POOL_DEFAULT_ENDPOINT_IP,
                POOL_DEFAULT_ENDPOINT_PORT,
            )),
            key_manager: None,
            pool: None,
            filler: None,
            peer_id: None,
        }
    }
}

impl<A: AttestationBackend> TrustedPoolServerBuilder<A> {
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        let port = self.addr.map_or(POOL_DEFAULT_ENDPOINT_PORT, |a| a.port());
        self.addr = Some(SocketAddr::new(ip, port));
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        let ip = self.addr.map_or(POOL_DEFAULT_ENDPOINT_IP, |a| a.ip());
        self.addr = Some(SocketAddr::new(ip, port));
        self
    }

    pub fn with_key_manager(mut self, key_manager: Arc<KeyManager<A>>) -> Self {
        self.key_manager = Some(key_manager);
        self
    }

    pub fn with_pool(mut self, pool: Arc<TxPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_filler(mut self, filler: Arc<BlockFiller>) -> Self {
        self.filler = Some(filler);
        self
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn build(self) -> Result<TrustedPoolServer<A>> {
        let addr = self.addr.ok_or_else(|| {
            anyhow!("No address found in builder (should not happen if default is set)")
        })?;
        let key_manager = self
            .key_manager
            .ok_or_else(|| anyhow!("No key manager supplied to builder"))?;
        let peer_id = self
            .peer_id
            .ok_or_else(|| anyhow!("No peer id supplied to builder"))?;
        let pool = self.pool.unwrap_or_default();
        let filler = self.filler.unwrap_or_default();

        let inner = Arc::new(TrustedPoolEngine::new(key_manager, pool, filler, peer_id));
        Ok(TrustedPoolServer { addr, inner })
    }
}

impl<A: AttestationBackend> TrustedPoolServer<A> {
    /// Create a new builder with default address
    pub fn builder() -> TrustedPoolServerBuilder<A> {
        TrustedPoolServerBuilder::default()
    }

    pub fn engine(&self) -> &Arc<TrustedPoolEngine<A>> {
        &self.inner
    }
}

impl<A: AttestationBackend> BuildableServer for TrustedPoolServer<A> {
    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn methods(self) -> Methods {
        let subscriptions = self.clone();
        let mut methods: Methods = TrustedPoolApiServer::into_rpc(self).into();
        methods
            .merge(TrustedPoolSubscriptionApiServer::into_rpc(subscriptions))
            .expect("method namespaces do not collide");
        methods
    }

    async fn start(self) -> Result<ServerHandle> {
        let addr = self.addr;
        let handle = BuildableServer::start_rpc_server(self).await;
        info!(target: "rpc::txpool", "Trusted pool server started at {}", addr);
        handle
    }
}

/// Derive implementation of the async [`TrustedPoolApiServer`] trait
/// for [`TrustedPoolServer<A>`].
/// Each implementation logs using debug! and delegates to `self.inner`
macro_rules! impl_forwarding_async_server_trait {
    ($(async fn $method_name:ident(&self $(, $param:ident: $param_ty:ty)*)
        -> $ret:ty $(, log = $log_msg:literal)?),* $(,)?) => {
        #[async_trait]
        impl<A: AttestationBackend> TrustedPoolApiServer for TrustedPoolServer<A> {
            $(
                async fn $method_name(&self $(, $param: $param_ty)*) -> RpcResult<$ret> {
                    $(debug!(target: "rpc::txpool", "Serving {}", $log_msg);)?
                    self.inner.$method_name($($param),*).await
                }
            )*
        }
    };
}
impl_forwarding_async_server_trait!(
    async fn health_check(&self) -> String,
    async fn service_ready(&self) -> ServiceReadyResponse,
    async fn check_secret_key(&self) -> bool,
    async fn get_public_key(&self) -> Option<secp256k1::PublicKey>,
    async fn pool_stats(&self) -> PoolStatsResponse,
    async fn pool_content(&self) -> PoolContentResponse, log = "poolContent",
    async fn pool_content_from(&self, address: Address) -> PoolContentResponse, log = "poolContentFrom",
    async fn pool_pending(&self) -> PoolPendingResponse, log = "poolPending",
    async fn pool_locals(&self) -> PoolLocalsResponse,
    async fn pending_nonce(&self, req: PendingNonceRequest) -> PendingNonceResponse,
    async fn pool_set_price(&self, req: SetGasPriceRequest) -> (), log = "poolSetPrice",
    async fn pool_gas_price(&self) -> GasPriceResponse,
    async fn add_local_txs(&self, req: AddTxsRequest) -> AddTxsResponse, log = "addLocalTxs",
    async fn add_remote_txs(&self, req: AddTxsRequest) -> AddTxsResponse, log = "addRemoteTxs",
    async fn add_local_crypted_txs(&self, req: AddCryptedTxsRequest) -> AddCryptedTxsResponse, log = "addLocalCryptedTxs",
    async fn add_remote_crypted_txs(&self, req: AddCryptedTxsRequest) -> AddCryptedTxsResponse, log = "addRemoteCryptedTxs",
    async fn tx_status(&self, req: TxStatusRequest) -> TxStatusResponse,
    async fn tx_get(&self, req: TxGetRequest) -> TxGetResponse,
    async fn tx_has(&self, req: TxHasRequest) -> TxHasResponse,
    async fn fill_block(&self, req: FillBlockRequest) -> FillBlockResponse, log = "fillBlock",
    async fn block_fill_records(&self) -> BlockFillRecordsResponse,
    async fn crypt(&self, req: CryptRequest) -> CryptResponse, log = "crypt",
    async fn decrypt(&self, req: DecryptRequest) -> DecryptResponse, log = "decrypt",
    async fn key_exchange_auth(&self, req: KeyAuthRequest) -> KeyAuthResponse, log = "keyExchangeAuth",
    async fn key_exchange_request(&self, req: KeyRequestRequest) -> KeyRequestResponse, log = "keyExchangeRequest",
    async fn provision_key(&self, req: ProvisionKeyRequest) -> ProvisionKeyResponse, log = "provisionKey",
);

#[async_trait]
impl<A: AttestationBackend> TrustedPoolSubscriptionApiServer for TrustedPoolServer<A> {
    async fn subscribe_new_transactions(
        &self,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let sink = pending.accept().await?;
        let mut events = self.inner.pool().subscribe();
        let engine = Arc::clone(&self.inner);
        debug!(target: "rpc::txpool", "new transaction subscriber connected");

        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                // transactions only ever leave the enclave as fleet-key envelopes
                let Some(pk) = engine.public_key() else {
                    warn!("dropping pool event, no fleet key to encrypt with");
                    continue;
                };
                let mut crypted_txs = Vec::with_capacity(event.txs.len());
                for tx in &event.txs {
                    match ecies_encrypt(&pk, &tx.encoded()) {
                        Ok(envelope) => crypted_txs.push(hex::encode(envelope)),
                        Err(e) => warn!("failed to encrypt pool transaction: {e:#}"),
                    }
                }
                let notification = NewTxsNotification { crypted_txs };
                let Ok(msg) = SubscriptionMessage::from_json(&notification) else {
                    continue;
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }
}

pub fn init_tracing() {
    // Read log level from RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
