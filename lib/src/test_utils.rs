use std::{
    collections::HashSet,
    sync::Arc,
};

use uuid::Uuid;

use crate::{
    NUM_PREV_IDS,
    chain::{ChainQuery, GeneratorHook, PeerFanout, Validity},
    crypto::{PrivateKey, Signature},
    sha256::{DoubleSha, Hash},
    template::WorkingBlock,
    types::{
        BlockHash, Difficulty, RewardAddress, SolvedBlock, Transaction, TransactionInput,
        TransactionOutput, TxId, TxRefHash,
    },
};

pub fn key() -> PrivateKey {
    PrivateKey::from_seed(&[11u8; 32]).unwrap()
}

/// A one-in, one-out transaction spending an output named `prev`.
pub fn spend(prev: &str, value: u64) -> Arc<Transaction> {
    let key = key();
    let prev = Hash::hash(&prev).unwrap();
    Arc::new(Transaction::new(
        vec![TransactionInput {
            prev_transaction_output_hash: prev,
            signature: Signature::sign_output(&prev, &key),
        }],
        vec![TransactionOutput {
            value,
            unique_id: Uuid::from_u128(value as u128),
            pubkey: key.public_key(),
        }],
    ))
}

#[derive(Default)]
pub struct MockChain {
    pub confirmed: HashSet<TxId>,
    /// Transactions whose first input no longer exists.
    pub invalid: HashSet<TxId>,
    /// Height of the tip; 1 when unset.
    pub height: Option<u32>,
}

impl MockChain {
    pub fn confirm(&mut self, tx: &Transaction) {
        self.confirmed.insert(tx.hash().unwrap());
    }

    pub fn unconfirm(&mut self, tx: &Transaction) {
        self.confirmed.remove(&tx.hash().unwrap());
    }

    pub fn invalidate(&mut self, tx: &Transaction) {
        self.invalid.insert(tx.hash().unwrap());
    }
}

impl ChainQuery for MockChain {
    fn is_in_main_chain(&self, tx_id: &TxId) -> bool {
        self.confirmed.contains(tx_id)
    }

    fn revalidate(&self, tx: &Transaction) -> Validity {
        if self.invalid.contains(&tx.hash().unwrap()) {
            Validity::InvalidInput(0)
        } else {
            Validity::Valid
        }
    }

    fn current_tip_summary(&self) -> Vec<u8> {
        vec![1, 2, 3]
    }

    fn current_height(&self) -> u32 {
        self.height.unwrap_or(1)
    }

    fn current_difficulty(&self) -> Difficulty {
        Difficulty(crate::EASY_DIFFICULTY)
    }

    fn previous_blocks(&self) -> [BlockHash; NUM_PREV_IDS] {
        [DoubleSha::of(b"genesis"); NUM_PREV_IDS]
    }
}

#[derive(Default)]
pub struct Recorder {
    pub new_pending: Vec<Arc<Transaction>>,
    pub retracted: Vec<Transaction>,
    pub positions: Vec<usize>,
}

impl PeerFanout for Recorder {
    fn notify_new_pending(&mut self, tx: &Transaction) {
        self.new_pending.push(Arc::new(tx.clone()));
    }

    fn notify_retracted(&mut self, tx: &Transaction) {
        self.retracted.push(tx.clone());
    }
}

impl GeneratorHook for Recorder {
    fn tell_new_pending(&mut self, position: usize, _tx: &Arc<Transaction>) {
        self.positions.push(position);
    }
}

/// Mines an easy block on [`MockChain`] holding `refs`, one per shard in turn.
pub fn solved_block(shard_order: u8, refs: &[TxRefHash]) -> SolvedBlock {
    let chain = MockChain::default();
    let mut block = WorkingBlock::on_tip(&chain, shard_order, RewardAddress([7; 20])).unwrap();
    let num_shards = block.num_shards() as u32;
    for (i, hash) in refs.iter().enumerate() {
        let shard = i as u32 % num_shards;
        let offset = block.shard(shard as usize).len() as u32;
        block.add_tx(shard, offset, *hash, 0).unwrap();
    }
    while block.try_solve().is_none() {
        block.advance();
    }
    block.into_solved().ok().unwrap()
}
