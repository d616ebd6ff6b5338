//! Block-proof reconciliation.
//!
//! Before a block is produced the node registers the transaction set it
//! handed to the builder, keyed by (parent hash, block time). When the block
//! arrives from the chain we count how many of its transactions came from
//! that set and record the proof root next to the block's own root.

use alloy_primitives::{keccak256, B256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

use txpool_enclave::{Block, BlockFillRecord, PoolTransaction};

struct BlockProof {
    given: HashSet<B256>,
    proof_root: B256,
}

fn proof_id(parent_hash: &B256, block_time: u64) -> B256 {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(parent_hash.as_slice());
    buf.extend_from_slice(&block_time.to_be_bytes());
    keccak256(buf)
}

/// Root over an ordered transaction set.
fn txs_root(hashes: impl Iterator<Item = B256>) -> B256 {
    let mut buf = Vec::new();
    for hash in hashes {
        buf.extend_from_slice(hash.as_slice());
    }
    keccak256(buf)
}

#[derive(Default)]
pub struct BlockFiller {
    proofs: Mutex<HashMap<B256, BlockProof>>,
    records: Mutex<Vec<BlockFillRecord>>,
}

impl BlockFiller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the expected transaction set for the block built on
    /// `parent_hash` at `block_time`.
    pub fn set_block_proof(&self, parent_hash: B256, block_time: u64, txs: &[PoolTransaction]) {
        let id = proof_id(&parent_hash, block_time);
        let hashes: Vec<B256> = txs.iter().map(PoolTransaction::hash).collect();
        let proof = BlockProof {
            proof_root: txs_root(hashes.iter().copied()),
            given: hashes.into_iter().collect(),
        };
        self.proofs.lock().unwrap().insert(id, proof);
    }

    /// Reconciles an arrived block against a registered proof, if any.
    pub fn verify_block(&self, block: &Block) -> Option<BlockFillRecord> {
        let id = proof_id(&block.parent_hash, block.timestamp);
        let proof = self.proofs.lock().unwrap().remove(&id)?;

        let match_tx_count = block
            .tx_hashes
            .iter()
            .filter(|hash| proof.given.contains(*hash))
            .count();
        let record = BlockFillRecord {
            block_hash: block.hash,
            match_tx_count,
            proof_root: proof.proof_root,
            block_root: block.tx_root,
        };
        debug!(
            block = %record.block_hash,
            matched = record.match_tx_count,
            "reconciled block against registered proof"
        );
        self.records.lock().unwrap().push(record.clone());
        Some(record)
    }

    pub fn records(&self) -> Vec<BlockFillRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn tx(nonce: u64) -> PoolTransaction {
        PoolTransaction {
            sender: Address::repeat_byte(9),
            nonce,
            gas_price: 1,
            payload: Bytes::from(vec![nonce as u8]),
        }
    }

    fn block(parent: B256, time: u64, txs: &[PoolTransaction]) -> Block {
        let tx_hashes: Vec<B256> = txs.iter().map(PoolTransaction::hash).collect();
        Block {
            hash: keccak256(b"block"),
            parent_hash: parent,
            number: 1,
            timestamp: time,
            tx_root: txs_root(tx_hashes.iter().copied()),
            tx_hashes,
        }
    }

    #[test]
    fn test_full_match_records_equal_roots() {
        let filler = BlockFiller::new();
        let txs = vec![tx(0), tx(1), tx(2)];
        let parent = B256::repeat_byte(7);
        filler.set_block_proof(parent, 1000, &txs);

        let record = filler.verify_block(&block(parent, 1000, &txs)).unwrap();
        assert_eq!(record.match_tx_count, 3);
        assert_eq!(record.proof_root, record.block_root);
        assert_eq!(filler.records().len(), 1);
    }

    #[test]
    fn test_partial_match_counts_overlap() {
        let filler = BlockFiller::new();
        let parent = B256::repeat_byte(7);
        filler.set_block_proof(parent, 1000, &[tx(0), tx(1)]);

        let record = filler
            .verify_block(&block(parent, 1000, &[tx(1), tx(5)]))
            .unwrap();
        assert_eq!(record.match_tx_count, 1);
        assert_ne!(record.proof_root, record.block_root);
    }

    #[test]
    fn test_unregistered_block_is_ignored() {
        let filler = BlockFiller::new();
        assert!(filler
            .verify_block(&block(B256::repeat_byte(7), 1000, &[tx(0)]))
            .is_none());
        assert!(filler.records().is_empty());
    }

    #[test]
    fn test_proof_consumed_once() {
        let filler = BlockFiller::new();
        let parent = B256::repeat_byte(7);
        let txs = vec![tx(0)];
        filler.set_block_proof(parent, 1000, &txs);

        assert!(filler.verify_block(&block(parent, 1000, &txs)).is_some());
        assert!(filler.verify_block(&block(parent, 1000, &txs)).is_none());
    }
}
