use alloy_primitives::{keccak256, Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A transaction as carried by the trusted pool.
///
/// The node's wire encoding is the JSON document of this struct; the
/// transaction hash is the keccak of that encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTransaction {
    pub sender: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub payload: Bytes,
}

impl PoolTransaction {
    /// Canonical wire encoding of the transaction.
    pub fn encoded(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("pool transaction serializes")
    }

    /// Transaction hash over the canonical encoding.
    pub fn hash(&self) -> B256 {
        keccak256(self.encoded())
    }
}

/// Position of a transaction relative to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Unknown,
    Queued,
    Pending,
    Included,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddTxsRequest {
    pub txs: Vec<PoolTransaction>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddTxsResponse {
    /// One entry per submitted transaction, `None` on success.
    pub errors: Vec<Option<String>>,
}

/// Transactions submitted as fleet-key envelopes (hex encoded).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddCryptedTxsRequest {
    pub crypted_txs: Vec<String>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddCryptedTxsResponse {
    pub results: Vec<AddCryptedTxResult>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddCryptedTxResult {
    /// Hash of the admitted transaction; zero when `error` is set.
    pub hash: B256,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxStatusRequest {
    pub hashes: Vec<B256>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxStatusResponse {
    pub status: Vec<TxStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxGetRequest {
    pub hash: B256,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxGetResponse {
    pub tx: Option<PoolTransaction>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxHasRequest {
    pub hash: B256,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TxHasResponse {
    pub has: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PendingNonceRequest {
    pub address: Address,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PendingNonceResponse {
    pub nonce: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SetGasPriceRequest {
    pub price: u128,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GasPriceResponse {
    pub price: u128,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolStatsResponse {
    pub pending: u64,
    pub queued: u64,
}

/// All transactions of one account, pending-nonce order.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountContent {
    pub address: Address,
    pub txs: Vec<PoolTransaction>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolContentResponse {
    pub pending: Vec<AccountContent>,
    pub queued: Vec<AccountContent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolPendingResponse {
    pub pending: Vec<AccountContent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolLocalsResponse {
    pub addresses: Vec<Address>,
}

/// Subscription payload: newly admitted transactions, each one a hex encoded
/// fleet-key envelope.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewTxsNotification {
    pub crypted_txs: Vec<String>,
}
