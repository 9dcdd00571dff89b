use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    crypto::{PublicKey, Signature},
    error::Result,
    sha256::{DoubleSha, Hash},
};

pub type TxId = Hash;

/// Ordering of transactions is by content, never by arrival. Two
/// transactions comparing equal are the same transaction as far as the pool
/// and the block template are concerned.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Transaction {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransactionInput {
    pub prev_transaction_output_hash: Hash,
    pub signature: Signature,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransactionOutput {
    pub value: u64,
    pub unique_id: Uuid,
    pub pubkey: PublicKey,
}

impl TransactionOutput {
    pub fn hash(&self) -> Result<Hash> {
        Hash::hash(self)
    }
}

impl Transaction {
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        Self { inputs, outputs }
    }

    pub fn hash(&self) -> Result<TxId> {
        Hash::hash(self)
    }

    /// The hash a block template commits to: the transaction id together
    /// with the outputs it spends.
    pub fn ref_hash(&self) -> Result<TxRefHash> {
        let mut ctx = Sha256::new().chain_update(self.hash()?.as_bytes());
        for input in &self.inputs {
            ctx.update(input.prev_transaction_output_hash.as_bytes());
        }
        Ok(TxRefHash(DoubleSha::finalize(ctx).0))
    }

    /// Shard this transaction belongs to in a block of `2^shard_order`
    /// shards.
    pub fn shard(&self, shard_order: u8) -> Result<u32> {
        let id = self.hash()?.as_bytes();
        let low = u32::from_le_bytes([id[0], id[1], id[2], id[3]]);
        Ok(low & shard_mask(shard_order))
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|output| output.value).sum()
    }
}

fn shard_mask(shard_order: u8) -> u32 {
    match shard_order {
        0 => 0,
        32.. => u32::MAX,
        order => (1u32 << order) - 1,
    }
}

impl Ord for TransactionInput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prev_transaction_output_hash
            .cmp(&other.prev_transaction_output_hash)
            .then_with(|| self.signature.to_bytes().cmp(&other.signature.to_bytes()))
    }
}

impl PartialOrd for TransactionInput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TransactionInput {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TransactionInput {}

impl Ord for TransactionOutput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| self.unique_id.cmp(&other.unique_id))
            .then_with(|| self.pubkey.to_bytes().cmp(&other.pubkey.to_bytes()))
    }
}

impl PartialOrd for TransactionOutput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TransactionOutput {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TransactionOutput {}

impl Ord for Transaction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inputs
            .len()
            .cmp(&other.inputs.len())
            .then_with(|| self.inputs.cmp(&other.inputs))
            .then_with(|| self.outputs.len().cmp(&other.outputs.len()))
            .then_with(|| self.outputs.cmp(&other.outputs))
    }
}

impl PartialOrd for Transaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Transaction {}

/// 32-byte commitment to a transaction as placed in a shard.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxRefHash(pub [u8; 32]);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;

    fn key() -> PrivateKey {
        PrivateKey::from_seed(&[3u8; 32]).unwrap()
    }

    fn output(value: u64, id: u128) -> TransactionOutput {
        TransactionOutput {
            value,
            unique_id: Uuid::from_u128(id),
            pubkey: key().public_key(),
        }
    }

    fn spend(prev: &str, value: u64, id: u128) -> Transaction {
        let prev = Hash::hash(&prev).unwrap();
        Transaction::new(
            vec![TransactionInput {
                prev_transaction_output_hash: prev,
                signature: Signature::sign_output(&prev, &key()),
            }],
            vec![output(value, id)],
        )
    }

    #[test]
    fn order_is_total_and_content_based() {
        let a = spend("a", 5, 1);
        let b = spend("b", 5, 1);
        let a_again = spend("a", 5, 1);

        assert_eq!(a.cmp(&a_again), Ordering::Equal);
        assert_eq!(a, a_again);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn fewer_inputs_sort_first() {
        let coinbase = Transaction::new(vec![], vec![output(50, 9)]);
        assert_eq!(coinbase.cmp(&spend("a", 1, 1)), Ordering::Less);
    }

    #[test]
    fn outputs_break_ties() {
        let small = spend("a", 1, 1);
        let large = spend("a", 2, 1);
        assert_eq!(small.cmp(&large), Ordering::Less);
    }

    #[test]
    fn shard_stays_in_range() {
        let tx = spend("a", 1, 1);
        assert_eq!(tx.shard(0).unwrap(), 0);
        for order in 1..8 {
            assert!(tx.shard(order).unwrap() < 1 << order);
        }
    }

    #[test]
    fn ref_hash_commits_to_inputs() {
        let a = spend("a", 1, 1);
        let b = spend("b", 1, 1);
        assert_ne!(a.ref_hash().unwrap(), b.ref_hash().unwrap());
        assert_eq!(a.ref_hash().unwrap(), a.clone().ref_hash().unwrap());
    }
}
