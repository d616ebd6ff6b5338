//! In-memory trusted transaction pool.
//!
//! Transactions are organized per sender: contiguous-nonce transactions are
//! pending (executable), nonce-gapped ones are queued until the gap fills.
//! The pool never sees plaintext transactions leave the enclave; the service
//! layer encrypts them before they go out on the subscription stream.

use alloy_primitives::{Address, B256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use txpool_enclave::{AccountContent, PoolTransaction, TxStatus};

/// Maximum number of transactions held across pending and queued.
pub const DEFAULT_POOL_CAPACITY: usize = 4096;
/// How many mined hashes to remember for `Included` status answers.
const MINED_HISTORY: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("already known")]
    AlreadyKnown,
    #[error("transaction underpriced")]
    Underpriced,
    #[error("nonce too low")]
    NonceTooLow,
    #[error("txpool is full")]
    PoolFull,
}

/// Broadcast on every successful admission batch.
#[derive(Debug, Clone)]
pub struct NewTxsEvent {
    pub txs: Vec<PoolTransaction>,
}

#[derive(Default)]
struct PoolInner {
    pending: HashMap<Address, BTreeMap<u64, PoolTransaction>>,
    queued: HashMap<Address, BTreeMap<u64, PoolTransaction>>,
    /// hash -> (sender, nonce) for point lookups
    by_hash: HashMap<B256, (Address, u64)>,
    /// next chain nonce per sender, advanced by mined blocks
    expected: HashMap<Address, u64>,
    locals: HashSet<Address>,
    mined: HashSet<B256>,
    mined_order: VecDeque<B256>,
    size: usize,
}

impl PoolInner {
    fn next_pending_nonce(&self, sender: &Address) -> u64 {
        let base = self.expected.get(sender).copied().unwrap_or(0);
        base + self.pending.get(sender).map_or(0, BTreeMap::len) as u64
    }

    fn admit(&mut self, tx: PoolTransaction, local: bool, floor: u128) -> Result<(), PoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) || self.mined.contains(&hash) {
            return Err(PoolError::AlreadyKnown);
        }
        if !local && tx.gas_price < floor {
            return Err(PoolError::Underpriced);
        }
        let expected = self.expected.get(&tx.sender).copied().unwrap_or(0);
        if tx.nonce < expected {
            return Err(PoolError::NonceTooLow);
        }
        if self.size >= DEFAULT_POOL_CAPACITY {
            return Err(PoolError::PoolFull);
        }
        let occupied = |m: &HashMap<Address, BTreeMap<u64, PoolTransaction>>| {
            m.get(&tx.sender).is_some_and(|txs| txs.contains_key(&tx.nonce))
        };
        if occupied(&self.pending) || occupied(&self.queued) {
            // same sender+nonce already pooled; replacement is not supported
            return Err(PoolError::AlreadyKnown);
        }

        let sender = tx.sender;
        let nonce = tx.nonce;
        if nonce == self.next_pending_nonce(&sender) {
            self.pending.entry(sender).or_default().insert(nonce, tx);
        } else {
            self.queued.entry(sender).or_default().insert(nonce, tx);
        }
        self.by_hash.insert(hash, (sender, nonce));
        self.size += 1;
        if local {
            self.locals.insert(sender);
        }
        self.promote(&sender);
        Ok(())
    }

    /// Moves queued transactions to pending while the nonce chain is contiguous.
    fn promote(&mut self, sender: &Address) {
        loop {
            let next = self.next_pending_nonce(sender);
            let Some(queue) = self.queued.get_mut(sender) else { break };
            let Some(tx) = queue.remove(&next) else { break };
            self.pending.entry(*sender).or_default().insert(next, tx);
        }
        if self.queued.get(sender).is_some_and(BTreeMap::is_empty) {
            self.queued.remove(sender);
        }
    }

    fn record_mined(&mut self, hash: B256) {
        if self.mined.insert(hash) {
            self.mined_order.push_back(hash);
            if self.mined_order.len() > MINED_HISTORY {
                if let Some(old) = self.mined_order.pop_front() {
                    self.mined.remove(&old);
                }
            }
        }
    }

    fn remove_tx(&mut self, sender: &Address, nonce: u64) -> Option<PoolTransaction> {
        let from = |m: &mut HashMap<Address, BTreeMap<u64, PoolTransaction>>| {
            let txs = m.get_mut(sender)?;
            let tx = txs.remove(&nonce);
            if txs.is_empty() {
                m.remove(sender);
            }
            tx
        };
        from(&mut self.pending).or_else(|| from(&mut self.queued))
    }

    /// Drops stale pending entries and demotes non-contiguous ones after the
    /// sender's chain nonce moved.
    fn reorganize(&mut self, sender: &Address) {
        let expected = self.expected.get(sender).copied().unwrap_or(0);
        if let Some(txs) = self.pending.remove(sender) {
            for (nonce, tx) in txs {
                if nonce < expected {
                    self.by_hash.remove(&tx.hash());
                    self.size -= 1;
                } else {
                    self.queued.entry(*sender).or_default().insert(nonce, tx);
                }
            }
        }
        if let Some(txs) = self.queued.get_mut(sender) {
            let stale: Vec<u64> = txs.range(..expected).map(|(n, _)| *n).collect();
            for nonce in stale {
                if let Some(tx) = txs.remove(&nonce) {
                    self.by_hash.remove(&tx.hash());
                    self.size -= 1;
                }
            }
            if txs.is_empty() {
                self.queued.remove(sender);
            }
        }
        self.promote(sender);
    }

    fn content_of(
        map: &HashMap<Address, BTreeMap<u64, PoolTransaction>>,
    ) -> Vec<AccountContent> {
        let mut accounts: Vec<AccountContent> = map
            .iter()
            .map(|(address, txs)| AccountContent {
                address: *address,
                txs: txs.values().cloned().collect(),
            })
            .collect();
        accounts.sort_by_key(|a| a.address);
        accounts
    }
}

/// Thread-safe trusted pool handle.
pub struct TxPool {
    inner: Mutex<PoolInner>,
    gas_price: Mutex<u128>,
    events: broadcast::Sender<NewTxsEvent>,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(PoolInner::default()),
            gas_price: Mutex::new(1),
            events,
        }
    }

    pub fn set_gas_price(&self, price: u128) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn gas_price(&self) -> u128 {
        *self.gas_price.lock().unwrap()
    }

    /// Admits a batch; one result slot per transaction, `None` on success.
    /// Successfully admitted transactions are broadcast to subscribers.
    pub fn add_txs(&self, txs: Vec<PoolTransaction>, local: bool) -> Vec<Option<PoolError>> {
        let floor = self.gas_price();
        let mut inner = self.inner.lock().unwrap();
        let mut admitted = Vec::new();
        let results = txs
            .into_iter()
            .map(|tx| match inner.admit(tx.clone(), local, floor) {
                Ok(()) => {
                    admitted.push(tx);
                    None
                }
                Err(e) => Some(e),
            })
            .collect();
        drop(inner);

        if !admitted.is_empty() {
            debug!(count = admitted.len(), local, "admitted transactions");
            let _ = self.events.send(NewTxsEvent { txs: admitted });
        }
        results
    }

    pub fn add_locals(&self, txs: Vec<PoolTransaction>) -> Vec<Option<PoolError>> {
        self.add_txs(txs, true)
    }

    pub fn add_remotes(&self, txs: Vec<PoolTransaction>) -> Vec<Option<PoolError>> {
        self.add_txs(txs, false)
    }

    pub fn status(&self, hashes: &[B256]) -> Vec<TxStatus> {
        let inner = self.inner.lock().unwrap();
        hashes
            .iter()
            .map(|hash| {
                if let Some((sender, nonce)) = inner.by_hash.get(hash) {
                    let in_pending = inner
                        .pending
                        .get(sender)
                        .is_some_and(|txs| txs.contains_key(nonce));
                    if in_pending {
                        TxStatus::Pending
                    } else {
                        TxStatus::Queued
                    }
                } else if inner.mined.contains(hash) {
                    TxStatus::Included
                } else {
                    TxStatus::Unknown
                }
            })
            .collect()
    }

    pub fn get(&self, hash: &B256) -> Option<PoolTransaction> {
        let inner = self.inner.lock().unwrap();
        let (sender, nonce) = inner.by_hash.get(hash)?;
        let find = |m: &HashMap<Address, BTreeMap<u64, PoolTransaction>>| {
            m.get(sender)?.get(nonce).cloned()
        };
        find(&inner.pending).or_else(|| find(&inner.queued))
    }

    pub fn has(&self, hash: &B256) -> bool {
        self.inner.lock().unwrap().by_hash.contains_key(hash)
    }

    /// Next executable nonce for the account, counting pending transactions.
    pub fn nonce(&self, address: &Address) -> u64 {
        self.inner.lock().unwrap().next_pending_nonce(address)
    }

    /// (pending, queued) transaction counts.
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        let count = |m: &HashMap<Address, BTreeMap<u64, PoolTransaction>>| {
            m.values().map(BTreeMap::len).sum()
        };
        (count(&inner.pending), count(&inner.queued))
    }

    pub fn content(&self) -> (Vec<AccountContent>, Vec<AccountContent>) {
        let inner = self.inner.lock().unwrap();
        (
            PoolInner::content_of(&inner.pending),
            PoolInner::content_of(&inner.queued),
        )
    }

    pub fn content_from(&self, address: &Address) -> (Vec<PoolTransaction>, Vec<PoolTransaction>) {
        let inner = self.inner.lock().unwrap();
        let of = |m: &HashMap<Address, BTreeMap<u64, PoolTransaction>>| {
            m.get(address)
                .map(|txs| txs.values().cloned().collect())
                .unwrap_or_default()
        };
        (of(&inner.pending), of(&inner.queued))
    }

    pub fn pending(&self) -> Vec<AccountContent> {
        PoolInner::content_of(&self.inner.lock().unwrap().pending)
    }

    pub fn locals(&self) -> Vec<Address> {
        let inner = self.inner.lock().unwrap();
        let mut locals: Vec<Address> = inner.locals.iter().copied().collect();
        locals.sort();
        locals
    }

    /// Prunes transactions included in a block and advances sender nonces.
    pub fn remove_mined(&self, hashes: &[B256]) {
        let mut inner = self.inner.lock().unwrap();
        let mut touched: HashSet<Address> = HashSet::new();
        for hash in hashes {
            inner.record_mined(*hash);
            let Some((sender, nonce)) = inner.by_hash.remove(hash) else { continue };
            if inner.remove_tx(&sender, nonce).is_some() {
                inner.size -= 1;
            }
            let expected = inner.expected.entry(sender).or_insert(0);
            *expected = (*expected).max(nonce + 1);
            touched.insert(sender);
        }
        for sender in touched {
            inner.reorganize(&sender);
        }
    }

    /// Accounts that currently have pooled transactions.
    pub fn senders(&self) -> Vec<Address> {
        let inner = self.inner.lock().unwrap();
        let mut senders: Vec<Address> = inner
            .pending
            .keys()
            .chain(inner.queued.keys())
            .copied()
            .collect();
        senders.sort();
        senders.dedup();
        senders
    }

    /// Aligns the pool's view of an account's chain nonce. Called with fresh
    /// chain-state nonces after each new head.
    pub fn set_account_nonce(&self, address: Address, nonce: u64) {
        let mut inner = self.inner.lock().unwrap();
        let expected = inner.expected.entry(address).or_insert(0);
        if nonce > *expected {
            *expected = nonce;
            inner.reorganize(&address);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NewTxsEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn tx(sender: u8, nonce: u64, gas_price: u128) -> PoolTransaction {
        PoolTransaction {
            sender: Address::repeat_byte(sender),
            nonce,
            gas_price,
            payload: Bytes::from(vec![sender, nonce as u8]),
        }
    }

    #[test]
    fn test_contiguous_nonces_are_pending() {
        let pool = TxPool::new();
        let errors = pool.add_locals(vec![tx(1, 0, 10), tx(1, 1, 10)]);
        assert!(errors.iter().all(Option::is_none));
        assert_eq!(pool.stats(), (2, 0));
        assert_eq!(pool.nonce(&Address::repeat_byte(1)), 2);
    }

    #[test]
    fn test_nonce_gap_queues_then_promotes() {
        let pool = TxPool::new();
        pool.add_locals(vec![tx(1, 0, 10), tx(1, 2, 10)]);
        assert_eq!(pool.stats(), (1, 1));

        // filling the gap promotes the queued transaction
        pool.add_locals(vec![tx(1, 1, 10)]);
        assert_eq!(pool.stats(), (3, 0));
    }

    #[test]
    fn test_duplicate_rejected() {
        let pool = TxPool::new();
        pool.add_locals(vec![tx(1, 0, 10)]);
        let errors = pool.add_locals(vec![tx(1, 0, 10)]);
        assert_eq!(errors[0], Some(PoolError::AlreadyKnown));
    }

    #[test]
    fn test_remote_underpriced_local_exempt() {
        let pool = TxPool::new();
        pool.set_gas_price(100);
        let errors = pool.add_remotes(vec![tx(1, 0, 10)]);
        assert_eq!(errors[0], Some(PoolError::Underpriced));
        let errors = pool.add_locals(vec![tx(2, 0, 10)]);
        assert!(errors[0].is_none());
        assert_eq!(pool.locals(), vec![Address::repeat_byte(2)]);
    }

    #[test]
    fn test_status_and_lookup() {
        let pool = TxPool::new();
        let t0 = tx(1, 0, 10);
        let t2 = tx(1, 2, 10);
        pool.add_locals(vec![t0.clone(), t2.clone()]);

        let status = pool.status(&[t0.hash(), t2.hash(), B256::ZERO]);
        assert_eq!(status, vec![TxStatus::Pending, TxStatus::Queued, TxStatus::Unknown]);
        assert_eq!(pool.get(&t0.hash()), Some(t0.clone()));
        assert!(pool.has(&t2.hash()));
    }

    #[test]
    fn test_remove_mined_advances_nonce() {
        let pool = TxPool::new();
        let t0 = tx(1, 0, 10);
        let t1 = tx(1, 1, 10);
        pool.add_locals(vec![t0.clone(), t1.clone()]);

        pool.remove_mined(&[t0.hash()]);
        assert_eq!(pool.stats(), (1, 0));
        assert_eq!(pool.status(&[t0.hash()])[0], TxStatus::Included);
        assert_eq!(pool.nonce(&Address::repeat_byte(1)), 2);

        // stale resubmission is refused
        let errors = pool.add_locals(vec![tx(1, 0, 10)]);
        assert_eq!(errors[0], Some(PoolError::AlreadyKnown));
    }

    #[test]
    fn test_set_account_nonce_drops_stale() {
        let pool = TxPool::new();
        pool.add_locals(vec![tx(1, 0, 10), tx(1, 1, 10), tx(1, 2, 10)]);
        pool.set_account_nonce(Address::repeat_byte(1), 2);
        assert_eq!(pool.stats(), (1, 0));
        assert_eq!(pool.nonce(&Address::repeat_byte(1)), 3);
    }

    #[test]
    fn test_senders_lists_pending_and_queued_accounts() {
        let pool = TxPool::new();
        pool.add_locals(vec![tx(1, 0, 10), tx(2, 5, 10)]);
        assert_eq!(
            pool.senders(),
            vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );

        // pruning every transaction of an account drops it from the list
        pool.set_account_nonce(Address::repeat_byte(2), 6);
        assert_eq!(pool.senders(), vec![Address::repeat_byte(1)]);
    }

    #[tokio::test]
    async fn test_subscription_delivers_admitted() {
        let pool = TxPool::new();
        let mut rx = pool.subscribe();
        pool.add_locals(vec![tx(1, 0, 10), tx(1, 0, 10)]);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.txs.len(), 1);
    }
}
