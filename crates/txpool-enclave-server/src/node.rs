//! Node assembly: keystore, key manager, pool, chain loop, and RPC server
//! wired together from a [`NodeConfig`].

use anyhow::{Context, Result};
use jsonrpsee::server::ServerHandle;
use rand::RngCore;
use secp256k1::SecretKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::attestation::{AttestationBackend, DevAttestation};
use crate::blockfill::BlockFiller;
use crate::chain::ChainClient;
use crate::config::NodeConfig;
use crate::key_manager::KeyManager;
use crate::keystore::{derive_sealing_key, Keystore};
use crate::pool::TxPool;
use crate::server::{provision_from_holder, TrustedPoolServer};
use txpool_enclave::rpc::BuildableServer;

const PROVISION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct Node {
    config: NodeConfig,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Starts the node and returns the RPC server handle.
    pub async fn start(self) -> Result<ServerHandle> {
        let config = self.config;
        let keystore = Arc::new(Keystore::new(
            config.node_dir.join("secret.db"),
            derive_sealing_key(config.sealing_secret.as_bytes()),
        ));
        let key_manager = Arc::new(KeyManager::new(DevAttestation::new(), None));

        // key sources in priority order: explicit key, sealed file, generation
        if let Some(hex_sk) = &config.private_key {
            let bytes = hex::decode(hex_sk).context("decoding --private-key")?;
            let sk = SecretKey::from_slice(&bytes).context("parsing --private-key")?;
            key_manager.install_secret_key(sk);
            info!("installed fleet key from command line");
        } else if keystore.exists() {
            key_manager.install_secret_key(keystore.load()?);
        } else if config.generate {
            key_manager.install_secret_key(keystore.generate()?);
        }

        // a key delivered over the handshake is persisted like any other
        {
            let keystore = Arc::clone(&keystore);
            key_manager.add_key_watcher(move |bytes| match SecretKey::from_slice(&bytes[..]) {
                Ok(sk) => {
                    if let Err(e) = keystore.save(&sk) {
                        error!("failed to persist provisioned key: {e:#}");
                    }
                }
                Err(e) => error!("provisioned key bytes are unusable: {e}"),
            });
        }

        let pool = Arc::new(TxPool::new());
        let filler = Arc::new(BlockFiller::new());

        if let Some(endpoint) = &config.chain_endpoint {
            let chain = Arc::new(ChainClient::new(endpoint)?);
            chain.start();
            spawn_head_loop(&chain, &pool, &filler);
        }

        let peer_id = config.peer_id.clone().unwrap_or_else(random_peer_id);
        let server = TrustedPoolServer::builder()
            .with_ip(config.ip)
            .with_port(config.port)
            .with_key_manager(Arc::clone(&key_manager))
            .with_pool(Arc::clone(&pool))
            .with_filler(filler)
            .with_peer_id(peer_id.clone())
            .build()?;
        let handle = server.start().await?;

        if !key_manager.check_secret_key() {
            if let Some(holder_url) = config.holder_url.clone() {
                let holder_peer_id = config.holder_peer_id.clone();
                spawn_provisioning(key_manager, peer_id, holder_url, holder_peer_id);
            } else {
                warn!("node has no fleet key and no holder configured, serving unready");
            }
        }
        Ok(handle)
    }
}

fn random_peer_id() -> String {
    let mut id = [0u8; 8];
    rand::rng().fill_bytes(&mut id);
    hex::encode(id)
}

fn spawn_head_loop(chain: &Arc<ChainClient>, pool: &Arc<TxPool>, filler: &Arc<BlockFiller>) {
    let mut heads = chain.subscribe_heads();
    let chain = Arc::clone(chain);
    let pool = Arc::clone(pool);
    let filler = Arc::clone(filler);
    tokio::spawn(async move {
        while let Ok(event) = heads.recv().await {
            pool.remove_mined(&event.block.tx_hashes);
            filler.verify_block(&event.block);

            // realign pooled accounts with chain state; a mined block can
            // carry transactions this node never pooled
            for sender in pool.senders() {
                match chain.nonce(sender).await {
                    Ok(nonce) => pool.set_account_nonce(sender, nonce),
                    Err(e) => {
                        warn!("account nonce refresh failed: {e:#}");
                        break;
                    }
                }
            }
        }
    });
}

/// Retries provisioning until a key is installed; the holder may simply not
/// be up yet when this node starts.
fn spawn_provisioning<A: AttestationBackend>(
    key_manager: Arc<KeyManager<A>>,
    peer_id: String,
    holder_url: String,
    holder_peer_id: String,
) {
    tokio::spawn(async move {
        loop {
            if key_manager.check_secret_key() {
                return;
            }
            match provision_from_holder(&key_manager, &peer_id, &holder_url, &holder_peer_id).await
            {
                Ok(()) => return,
                Err(e) => warn!("key provisioning attempt failed: {e:#}"),
            }
            tokio::time::sleep(PROVISION_RETRY_INTERVAL).await;
        }
    });
}
