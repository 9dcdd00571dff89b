//! The pending pool: transactions seen but not yet confirmed.
//!
//! Entries are kept in a contiguous array, strictly sorted by the
//! transaction ordering and free of duplicates. A reorg donates the evicted
//! block's transactions wholesale, which breaks both properties until the
//! pool is reconciled against the new tip; that window is a separate type,
//! [`DirtyPool`], which can only take more donations or be reconciled.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    chain::{ChainQuery, GeneratorHook, PeerFanout, Validity},
    types::{Transaction, TxId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// Now at this index of the sorted pool.
    Inserted(usize),
    Duplicate,
}

#[derive(Debug, Default, Clone)]
pub struct PendingPool {
    txs: Vec<Arc<Transaction>>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.txs.iter()
    }

    pub fn as_slice(&self) -> &[Arc<Transaction>] {
        &self.txs
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Transaction>> {
        self.txs.get(index)
    }

    /// `Ok` with the index of an equal entry, or `Err` with where `tx` would
    /// be inserted.
    pub fn position(&self, tx: &Transaction) -> Result<usize, usize> {
        self.txs.binary_search_by(|pending| pending.as_ref().cmp(tx))
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.position(tx).is_ok()
    }

    pub fn find(&self, tx_id: &TxId) -> Option<&Arc<Transaction>> {
        self.txs
            .iter()
            .find(|tx| tx.hash().is_ok_and(|id| id == *tx_id))
    }

    /// Inserts `tx` unless an equal transaction is already pending. On
    /// insertion the generator hears about the new position and peers get
    /// the transaction.
    pub fn add<G, P>(&mut self, tx: Arc<Transaction>, generator: &mut G, peers: &mut P) -> AddOutcome
    where
        G: GeneratorHook,
        P: PeerFanout,
    {
        let position = match self.position(&tx) {
            Ok(_) => {
                debug!(tx = ?tx.hash().ok(), "ignoring duplicate transaction");
                return AddOutcome::Duplicate;
            }
            Err(position) => position,
        };

        self.txs.insert(position, Arc::clone(&tx));
        debug!(position, pending = self.txs.len(), "added pending transaction");

        generator.tell_new_pending(position, &tx);
        peers.notify_new_pending(&tx);
        AddOutcome::Inserted(position)
    }

    /// Starts a reorg: the evicted block's transactions are appended as-is.
    pub fn bulk_add<I>(self, txs: I) -> DirtyPool
    where
        I: IntoIterator<Item = Arc<Transaction>>,
    {
        let mut dirty = DirtyPool { txs: self.txs };
        dirty.bulk_add(txs);
        dirty
    }

    /// Drops whatever the chain has since confirmed or invalidated. Used
    /// when a block connects without anything being evicted.
    pub fn reconcile<C, P>(self, chain: &C, peers: &mut P) -> PendingPool
    where
        C: ChainQuery,
        P: PeerFanout,
    {
        DirtyPool { txs: self.txs }.reconcile(chain, peers)
    }
}

/// A pool between a reorg donation and the reconcile that must follow it.
/// Contents are unsorted and may hold duplicates.
#[derive(Debug)]
#[must_use = "a dirty pool has to be reconciled before it can be used"]
pub struct DirtyPool {
    txs: Vec<Arc<Transaction>>,
}

impl DirtyPool {
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// More than one block can be evicted by the same reorg.
    pub fn bulk_add<I>(&mut self, txs: I)
    where
        I: IntoIterator<Item = Arc<Transaction>>,
    {
        let before = self.txs.len();
        self.txs.extend(txs);
        debug!(added = self.txs.len() - before, "added transactions from old block");
    }

    pub fn reconcile<C, P>(self, chain: &C, peers: &mut P) -> PendingPool
    where
        C: ChainQuery,
        P: PeerFanout,
    {
        let searched = self.txs.len();
        debug!(searched, "searching pending transactions");

        // Duplicates go first so each transaction is judged, and retracted,
        // at most once. Filtering keeps the survivors sorted.
        let mut txs = self.txs;
        txs.sort();
        txs.dedup();

        let mut survivors: Vec<Arc<Transaction>> = Vec::with_capacity(txs.len());
        for (i, tx) in txs.into_iter().enumerate() {
            let tx_id = match tx.hash() {
                Ok(tx_id) => tx_id,
                Err(e) => {
                    warn!(index = i, "dropping unhashable pending transaction: {e}");
                    continue;
                }
            };

            if chain.is_in_main_chain(&tx_id) {
                debug!(index = i, %tx_id, "already in main chain");
                continue;
            }

            match chain.revalidate(&tx) {
                Validity::Valid => survivors.push(tx),
                Validity::InvalidInput(input) => {
                    debug!(index = i, %tx_id, input, "no longer valid: bad input");
                    peers.notify_retracted(&tx);
                }
                Validity::Overspend => {
                    debug!(index = i, %tx_id, "no longer valid: overspends");
                    peers.notify_retracted(&tx);
                }
            }
        }

        debug!(
            removed = searched - survivors.len(),
            searched, "cleaned up pending transactions"
        );

        PendingPool { txs: survivors }
    }
}

#[cfg(test)]
mod tests;
