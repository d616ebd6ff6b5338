use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

use crate::request_types::pool::PoolTransaction;

/// Block summary served by the external chain service.
///
/// The trusted pool only needs header identity plus the hashes of the
/// transactions the block included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
    /// Root commitment over the block's transaction list.
    pub tx_root: B256,
    pub tx_hashes: Vec<B256>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BalanceResponse {
    pub balance: U256,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NonceResponse {
    pub nonce: u64,
}

/// Register the transaction set handed to the builder of the block on
/// `parent_hash` at `block_time`, so the arrived block can be reconciled
/// against it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FillBlockRequest {
    pub parent_hash: B256,
    pub block_time: u64,
    pub txs: Vec<PoolTransaction>,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FillBlockResponse {}

/// Outcome of reconciling one arrived block against a registered set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockFillRecord {
    #[serde(rename = "block-hash")]
    pub block_hash: B256,
    #[serde(rename = "match-tx-count")]
    pub match_tx_count: usize,
    #[serde(rename = "proof-root")]
    pub proof_root: B256,
    #[serde(rename = "block-root")]
    pub block_root: B256,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BlockFillRecordsResponse {
    pub records: Vec<BlockFillRecord>,
}
