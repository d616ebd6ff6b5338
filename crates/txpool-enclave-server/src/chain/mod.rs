//! Client for the external chain service.
//!
//! The chain service runs outside the enclave; the node only needs the head
//! of the chain, account balances, and account nonces from it. New heads are
//! discovered by polling and fanned out on a broadcast channel.

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use txpool_enclave::{BalanceResponse, Block, NonceResponse};

const HEAD_POLL_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Surface the external chain service exposes to the trusted node.
#[rpc(client, namespace = "chain")]
pub trait ChainApi {
    #[method(name = "currentBlock")]
    async fn current_block(&self) -> RpcResult<Option<Block>>;

    #[method(name = "getBalance")]
    async fn get_balance(&self, address: Address) -> RpcResult<BalanceResponse>;

    #[method(name = "getNonce")]
    async fn get_nonce(&self, address: Address) -> RpcResult<NonceResponse>;
}

#[derive(Debug, Clone)]
pub struct NewBlockEvent {
    pub block: Block,
}

pub struct ChainClient {
    client: HttpClient,
    heads: broadcast::Sender<NewBlockEvent>,
}

impl ChainClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .build(endpoint)
            .with_context(|| format!("failed to connect chain service at {endpoint}"))?;
        let (heads, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { client, heads })
    }

    pub async fn current_block(&self) -> Result<Option<Block>> {
        self.client
            .current_block()
            .await
            .context("chain currentBlock failed")
    }

    pub async fn balance(&self, address: Address) -> Result<U256> {
        let res = self
            .client
            .get_balance(address)
            .await
            .context("chain getBalance failed")?;
        Ok(res.balance)
    }

    pub async fn nonce(&self, address: Address) -> Result<u64> {
        let res = self
            .client
            .get_nonce(address)
            .await
            .context("chain getNonce failed")?;
        Ok(res.nonce)
    }

    pub fn subscribe_heads(&self) -> broadcast::Receiver<NewBlockEvent> {
        self.heads.subscribe()
    }

    /// Spawns the background head-polling loop.
    pub fn start(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_head: Option<B256> = None;
            loop {
                tokio::time::sleep(HEAD_POLL_INTERVAL).await;
                let block = match client.current_block().await {
                    Ok(Some(block)) => block,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("head poll failed: {e:#}");
                        continue;
                    }
                };
                if last_head == Some(block.hash) {
                    continue;
                }
                debug!(number = block.number, hash = %block.hash, "new chain head");
                last_head = Some(block.hash);
                let _ = client.heads.send(NewBlockEvent { block });
            }
        });
    }
}
