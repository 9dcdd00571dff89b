//! What the mempool and the template builder need from the rest of the node.
//!
//! The chain index, block validation and the peer wire layer live outside
//! this crate. They are reached only through these traits so the pool can be
//! driven by a real node, by an in-memory chain, or by a test double.

use std::sync::Arc;

use crate::{
    NUM_PREV_IDS,
    types::{BlockHash, Difficulty, Transaction, TxId},
};

/// Result of re-checking a pending transaction against the current tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// The input at this index is unknown, repeated, already spent or
    /// badly signed.
    InvalidInput(usize),
    /// Outputs add up to more than the inputs.
    Overspend,
}

pub trait ChainQuery {
    /// Whether a transaction with this id sits in a block on the main chain.
    fn is_in_main_chain(&self, tx_id: &TxId) -> bool;
    fn revalidate(&self, tx: &Transaction) -> Validity;
    /// Bytes summarising which earlier transactions this node has seen.
    fn current_tip_summary(&self) -> Vec<u8>;
    fn current_height(&self) -> u32;
    fn current_difficulty(&self) -> Difficulty;
    /// Tip first, then further ancestors.
    fn previous_blocks(&self) -> [BlockHash; NUM_PREV_IDS];
}

pub trait PeerFanout {
    fn notify_new_pending(&mut self, tx: &Transaction);
    fn notify_retracted(&mut self, tx: &Transaction);
}

/// Lets whoever is assembling the next block hear about new pool entries.
pub trait GeneratorHook {
    fn tell_new_pending(&mut self, position: usize, tx: &Arc<Transaction>);
}

impl PeerFanout for () {
    fn notify_new_pending(&mut self, _tx: &Transaction) {}
    fn notify_retracted(&mut self, _tx: &Transaction) {}
}

impl GeneratorHook for () {
    fn tell_new_pending(&mut self, _position: usize, _tx: &Arc<Transaction>) {}
}
