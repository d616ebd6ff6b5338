//! JSON-RPC integration tests: a full node surface over HTTP, two-node key
//! provisioning, and the encrypted transaction subscription over WebSocket.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use jsonrpsee::core::client::{Subscription, SubscriptionClientT};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::server::ServerHandle;
use jsonrpsee::ws_client::WsClientBuilder;
use secp256k1::SecretKey;

use txpool_enclave::request_types::*;
use txpool_enclave::rpc::{BuildableServer, TrustedPoolApiClient};
use txpool_enclave::{ecies_decrypt, get_unsecure_sample_secp256k1_sk};
use txpool_enclave_server::attestation::MockAttestation;
use txpool_enclave_server::blockfill::BlockFiller;
use txpool_enclave_server::key_manager::KeyManager;
use txpool_enclave_server::server::TrustedPoolServer;

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn start_node(
    sk: Option<SecretKey>,
    peer_id: &str,
) -> (SocketAddr, Arc<KeyManager<MockAttestation>>, ServerHandle) {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, free_port()));
    let key_manager = Arc::new(KeyManager::new(MockAttestation, sk));
    let server = TrustedPoolServer::builder()
        .with_ip(addr.ip())
        .with_port(addr.port())
        .with_key_manager(Arc::clone(&key_manager))
        .with_peer_id(peer_id)
        .build()
        .unwrap();
    let handle = server.start().await.unwrap();
    (addr, key_manager, handle)
}

fn http_client(addr: SocketAddr) -> HttpClient {
    HttpClientBuilder::default()
        .build(format!("http://{addr}"))
        .unwrap()
}

fn sample_tx(nonce: u64) -> PoolTransaction {
    PoolTransaction {
        sender: Address::repeat_byte(0xaa),
        nonce,
        gas_price: 10,
        payload: Bytes::from(vec![0xde, 0xad]),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_node_surface_over_http() {
    let sk = get_unsecure_sample_secp256k1_sk();
    let (addr, _km, _handle) = start_node(Some(sk), "node").await;
    let client = http_client(addr);

    assert_eq!(client.health_check().await.unwrap(), "OK");
    assert!(client.service_ready().await.unwrap().ready);
    assert!(client.check_secret_key().await.unwrap());
    assert!(client.get_public_key().await.unwrap().is_some());

    // plaintext admission and queries
    let tx = sample_tx(0);
    let res = client
        .add_local_txs(AddTxsRequest {
            txs: vec![tx.clone(), sample_tx(2)],
        })
        .await
        .unwrap();
    assert_eq!(res.errors, vec![None, None]);

    let stats = client.pool_stats().await.unwrap();
    assert_eq!((stats.pending, stats.queued), (1, 1));

    let nonce = client
        .pending_nonce(PendingNonceRequest { address: tx.sender })
        .await
        .unwrap();
    assert_eq!(nonce.nonce, 1);

    let status = client
        .tx_status(TxStatusRequest {
            hashes: vec![tx.hash(), B256::ZERO],
        })
        .await
        .unwrap();
    assert_eq!(status.status, vec![TxStatus::Pending, TxStatus::Unknown]);
    assert!(client.tx_has(TxHasRequest { hash: tx.hash() }).await.unwrap().has);
    assert_eq!(
        client.tx_get(TxGetRequest { hash: tx.hash() }).await.unwrap().tx,
        Some(tx.clone())
    );

    let content = client.pool_content().await.unwrap();
    assert_eq!(content.pending.len(), 1);
    assert_eq!(content.pending[0].address, tx.sender);
    assert_eq!(
        client.pool_locals().await.unwrap().addresses,
        vec![tx.sender]
    );

    // gas price floor applies to remote submissions
    client
        .pool_set_price(SetGasPriceRequest { price: 100 })
        .await
        .unwrap();
    assert_eq!(client.pool_gas_price().await.unwrap().price, 100);
    let res = client
        .add_remote_txs(AddTxsRequest {
            txs: vec![PoolTransaction {
                sender: Address::repeat_byte(0xbb),
                ..sample_tx(0)
            }],
        })
        .await
        .unwrap();
    assert!(res.errors[0].is_some());

    // garbage that was never sealed to the fleet key is refused
    assert!(client
        .decrypt(DecryptRequest {
            data: vec![0u8; 64],
        })
        .await
        .is_err());

    // fleet-key envelope round trip, then encrypted submission
    let crypted = client
        .crypt(CryptRequest {
            data: b"trusted bytes".to_vec(),
        })
        .await
        .unwrap();
    let decrypted = client
        .decrypt(DecryptRequest {
            data: crypted.crypted,
        })
        .await
        .unwrap();
    assert_eq!(decrypted.decrypted, b"trusted bytes");

    let crypted_tx = {
        let envelope = client
            .crypt(CryptRequest {
                data: sample_tx(1).encoded(),
            })
            .await
            .unwrap();
        hex::encode(envelope.crypted)
    };
    let res = client
        .add_local_crypted_txs(AddCryptedTxsRequest {
            crypted_txs: vec![crypted_tx, "not hex".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(res.results[0].error, None);
    assert_eq!(res.results[0].hash, sample_tx(1).hash());
    assert!(res.results[1].error.is_some());

    // nonce 1 filled the gap, nonce 2 was promoted
    let stats = client.pool_stats().await.unwrap();
    assert_eq!((stats.pending, stats.queued), (3, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fill_block_reconciliation_over_rpc() {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, free_port()));
    let key_manager = Arc::new(KeyManager::new(
        MockAttestation,
        Some(get_unsecure_sample_secp256k1_sk()),
    ));
    let filler = Arc::new(BlockFiller::new());
    let server = TrustedPoolServer::builder()
        .with_ip(addr.ip())
        .with_port(addr.port())
        .with_key_manager(key_manager)
        .with_filler(Arc::clone(&filler))
        .with_peer_id("node")
        .build()
        .unwrap();
    let _handle = server.start().await.unwrap();
    let client = http_client(addr);

    // a builder registers the set it was handed for the upcoming block
    let txs = vec![sample_tx(0), sample_tx(1)];
    let parent_hash = B256::repeat_byte(7);
    client
        .fill_block(FillBlockRequest {
            parent_hash,
            block_time: 1000,
            txs: txs.clone(),
        })
        .await
        .unwrap();
    assert!(client.block_fill_records().await.unwrap().records.is_empty());

    // the block arrives from the chain with one of the two transactions
    filler.verify_block(&Block {
        hash: B256::repeat_byte(8),
        parent_hash,
        number: 1,
        timestamp: 1000,
        tx_root: B256::ZERO,
        tx_hashes: vec![txs[0].hash()],
    });

    let records = client.block_fill_records().await.unwrap().records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].block_hash, B256::repeat_byte(8));
    assert_eq!(records[0].match_tx_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_key_provisioning_between_nodes() {
    let key = get_unsecure_sample_secp256k1_sk();
    let (holder_addr, holder_km, _holder_handle) = start_node(Some(key), "holder").await;
    let (seeker_addr, seeker_km, _seeker_handle) = start_node(None, "seeker").await;

    let seeker = http_client(seeker_addr);
    assert!(!seeker.check_secret_key().await.unwrap());
    assert!(!seeker.service_ready().await.unwrap().ready);

    // a keyless node cannot open envelopes yet
    assert!(seeker
        .decrypt(DecryptRequest { data: vec![1, 2, 3] })
        .await
        .is_err());

    seeker
        .provision_key(ProvisionKeyRequest {
            holder_url: format!("http://{holder_addr}"),
            holder_peer_id: "holder".to_string(),
        })
        .await
        .unwrap();

    assert!(seeker.check_secret_key().await.unwrap());
    assert_eq!(seeker_km.secret_key(), holder_km.secret_key());

    let holder = http_client(holder_addr);
    assert_eq!(
        seeker.get_public_key().await.unwrap(),
        holder.get_public_key().await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscription_streams_encrypted_txs() {
    let sk = get_unsecure_sample_secp256k1_sk();
    let (addr, _km, _handle) = start_node(Some(sk), "node").await;

    let ws = WsClientBuilder::default()
        .build(format!("ws://{addr}"))
        .await
        .unwrap();
    let mut sub: Subscription<NewTxsNotification> = ws
        .subscribe(
            "subscribeNewTransactions",
            rpc_params![],
            "unsubscribeNewTransactions",
        )
        .await
        .unwrap();

    let tx = sample_tx(0);
    let client = http_client(addr);
    client
        .add_local_txs(AddTxsRequest { txs: vec![tx.clone()] })
        .await
        .unwrap();

    let notification = sub.next().await.unwrap().unwrap();
    assert_eq!(notification.crypted_txs.len(), 1);

    // the stream carries fleet-key envelopes, never plaintext
    let envelope = hex::decode(&notification.crypted_txs[0]).unwrap();
    assert_ne!(envelope, tx.encoded());
    assert_eq!(ecies_decrypt(&sk, &envelope).unwrap(), tx.encoded());
}
