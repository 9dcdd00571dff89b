use std::{collections::HashSet, sync::Arc};

use coinlib::{
    EASY_DIFFICULTY, NUM_PREV_IDS,
    chain::{ChainQuery, Validity},
    crypto::{PrivateKey, Signature},
    sha256::{DoubleSha, Hash},
    types::{BlockHash, Difficulty, Transaction, TransactionInput, TransactionOutput, TxId},
};
use uuid::Uuid;

pub fn key() -> PrivateKey {
    PrivateKey::from_seed(&[23u8; 32]).unwrap()
}

/// `n` distinct one-in, one-out transactions.
pub fn spends(n: u64) -> Vec<Arc<Transaction>> {
    let key = key();
    (0..n)
        .map(|i| {
            let prev = Hash::hash(&format!("coin {i}")).unwrap();
            Arc::new(Transaction::new(
                vec![TransactionInput {
                    prev_transaction_output_hash: prev,
                    signature: Signature::sign_output(&prev, &key),
                }],
                vec![TransactionOutput {
                    value: 10 + i,
                    unique_id: Uuid::from_u128(i as u128),
                    pubkey: key.public_key(),
                }],
            ))
        })
        .collect()
}

/// Chain that knows only which transactions it has confirmed.
#[derive(Default)]
pub struct Confirmed {
    pub txs: HashSet<TxId>,
    pub height: u32,
}

impl Confirmed {
    pub fn connect(&mut self, txs: &[Arc<Transaction>]) {
        self.txs.extend(txs.iter().map(|tx| tx.hash().unwrap()));
        self.height += 1;
    }

    pub fn disconnect(&mut self, txs: &[Arc<Transaction>]) {
        for tx in txs {
            self.txs.remove(&tx.hash().unwrap());
        }
        self.height -= 1;
    }
}

impl ChainQuery for Confirmed {
    fn is_in_main_chain(&self, tx_id: &TxId) -> bool {
        self.txs.contains(tx_id)
    }

    fn revalidate(&self, _tx: &Transaction) -> Validity {
        Validity::Valid
    }

    fn current_tip_summary(&self) -> Vec<u8> {
        vec![0xff; 4]
    }

    fn current_height(&self) -> u32 {
        self.height
    }

    fn current_difficulty(&self) -> Difficulty {
        Difficulty(EASY_DIFFICULTY)
    }

    fn previous_blocks(&self) -> [BlockHash; NUM_PREV_IDS] {
        [DoubleSha::of(&self.height.to_le_bytes()); NUM_PREV_IDS]
    }
}
