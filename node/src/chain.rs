//! A single-node chain kept entirely in memory: enough state to confirm the
//! blocks this node mines and to check pending transactions against them.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use coinlib::{
    NUM_PREV_IDS,
    chain::{ChainQuery, Validity},
    mempool::PendingPool,
    sha256::{DoubleSha, Hash},
    types::{
        BlockHash, Difficulty, RewardAddress, SolvedBlock, Transaction, TransactionOutput, TxId,
        TxRefHash,
    },
};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

struct ChainBlock {
    hash: BlockHash,
    shards: Vec<Vec<TxRefHash>>,
    txs: Vec<Arc<Transaction>>,
    /// Outputs this block consumed, to put back on disconnect.
    spent: Vec<(Hash, TransactionOutput)>,
}

pub struct MemChain {
    utxos: HashMap<Hash, TransactionOutput>,
    confirmed: HashSet<TxId>,
    blocks: Vec<ChainBlock>,
    difficulty: Difficulty,
    fees_to: RewardAddress,
}

impl MemChain {
    /// Starts a chain whose genesis block creates `outputs` out of nothing.
    /// `fees_to` is the address this node mines for.
    pub fn genesis(
        outputs: Vec<TransactionOutput>,
        difficulty: Difficulty,
        fees_to: RewardAddress,
    ) -> Result<Self> {
        ensure!(difficulty.is_valid(), "invalid difficulty {difficulty}");

        let funding = Arc::new(Transaction::new(vec![], outputs));
        let mut utxos = HashMap::new();
        for output in &funding.outputs {
            utxos.insert(output.hash()?, output.clone());
        }
        let confirmed = HashSet::from([funding.hash()?]);

        let genesis = ChainBlock {
            hash: DoubleSha::of(b"genesis"),
            shards: vec![Vec::new()],
            txs: vec![funding],
            spent: vec![],
        };
        info!(utxos = utxos.len(), "created genesis block");

        Ok(Self {
            utxos,
            confirmed,
            blocks: vec![genesis],
            difficulty,
            fees_to,
        })
    }

    pub fn tip(&self) -> BlockHash {
        self.blocks.last().map(|block| block.hash).unwrap_or_default()
    }

    pub fn utxos(&self) -> impl Iterator<Item = (&Hash, &TransactionOutput)> {
        self.utxos.iter()
    }

    /// Confirms a mined block. Every transaction it references has to be
    /// pending in `pool` and valid in the order the block lists them.
    pub fn connect(&mut self, block: &SolvedBlock, pool: &PendingPool) -> Result<()> {
        ensure!(block.verify()?, "block {} does not verify", block.hash);
        ensure!(
            block.header.prevs[0] == self.tip(),
            "block {} does not build on tip {}",
            block.hash,
            self.tip()
        );
        let next_height = self.current_height().saturating_add(1);
        ensure!(
            block.header.height == next_height,
            "block {} has height {}, expected {next_height}",
            block.hash,
            block.header.height,
        );

        let mut by_ref = HashMap::with_capacity(pool.len());
        for tx in pool.iter() {
            by_ref.insert(tx.ref_hash()?, Arc::clone(tx));
        }
        // Nothing is touched until every reference resolves.
        let resolved = block
            .shards
            .iter()
            .flatten()
            .map(|ref_hash| {
                by_ref
                    .get(ref_hash)
                    .cloned()
                    .ok_or_else(|| anyhow!("block references unknown transaction"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut txs = Vec::with_capacity(resolved.len());
        let mut spent = Vec::new();
        for tx in resolved {
            if let Err(e) = self.check(&tx) {
                self.undo(txs, spent);
                return Err(e);
            }
            let applied = self.apply(&tx, &mut spent);
            txs.push(tx);
            if let Err(e) = applied {
                self.undo(txs, spent);
                return Err(e);
            }
        }

        info!(hash = %block.hash, height = block.header.height, txs = txs.len(), "connected block");
        self.blocks.push(ChainBlock {
            hash: block.hash,
            shards: block.shards.clone(),
            txs,
            spent,
        });
        Ok(())
    }

    /// Drops the tip and hands back its transactions. Genesis stays.
    pub fn disconnect(&mut self) -> Option<Vec<Arc<Transaction>>> {
        if self.blocks.len() <= 1 {
            return None;
        }
        let block = self.blocks.pop()?;
        info!(hash = %block.hash, txs = block.txs.len(), "disconnected block");
        let txs = block.txs.clone();
        self.undo(block.txs, block.spent);
        Some(txs)
    }

    fn check(&self, tx: &Transaction) -> Result<()> {
        match self.revalidate(tx) {
            Validity::Valid => Ok(()),
            Validity::InvalidInput(input) => bail!("transaction has bad input {input}"),
            Validity::Overspend => bail!("transaction spends more than it has"),
        }
    }

    /// Records each consumed output in `spent` as it goes, so a failure
    /// part way through can still be undone.
    fn apply(&mut self, tx: &Transaction, spent: &mut Vec<(Hash, TransactionOutput)>) -> Result<()> {
        for input in &tx.inputs {
            let prev = input.prev_transaction_output_hash;
            let output = self
                .utxos
                .remove(&prev)
                .context("spending an output that is not there")?;
            spent.push((prev, output));
        }
        for output in &tx.outputs {
            self.utxos.insert(output.hash()?, output.clone());
        }
        self.confirmed.insert(tx.hash()?);
        Ok(())
    }

    fn undo(&mut self, txs: Vec<Arc<Transaction>>, spent: Vec<(Hash, TransactionOutput)>) {
        for tx in &txs {
            for output in &tx.outputs {
                if let Ok(hash) = output.hash() {
                    self.utxos.remove(&hash);
                }
            }
            if let Ok(id) = tx.hash() {
                self.confirmed.remove(&id);
            }
        }
        self.utxos.extend(spent);
    }

    /// One byte per shard of a past block, tying this node's address to
    /// that shard's contents.
    fn prev_txhash(fees_to: &RewardAddress, shard: &[TxRefHash]) -> u8 {
        let mut ctx = Sha256::new().chain_update(fees_to.0);
        for hash in shard {
            ctx.update(hash.0);
        }
        DoubleSha::finalize(ctx).0[0]
    }
}

impl ChainQuery for MemChain {
    fn is_in_main_chain(&self, tx_id: &TxId) -> bool {
        self.confirmed.contains(tx_id)
    }

    fn revalidate(&self, tx: &Transaction) -> Validity {
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut available = 0u64;
        for (i, input) in tx.inputs.iter().enumerate() {
            let prev = &input.prev_transaction_output_hash;
            let Some(output) = self.utxos.get(prev) else {
                return Validity::InvalidInput(i);
            };
            if !seen.insert(*prev) || !input.signature.verify(prev, &output.pubkey) {
                return Validity::InvalidInput(i);
            }
            available = available.saturating_add(output.value);
        }

        if tx.output_value() > available {
            return Validity::Overspend;
        }
        Validity::Valid
    }

    /// Blocks 1, 2, 4, 8... back from the next block, every shard of each.
    fn current_tip_summary(&self) -> Vec<u8> {
        let mut summary = Vec::new();
        let mut distance = 1;
        while distance <= self.blocks.len() {
            let block = &self.blocks[self.blocks.len() - distance];
            for shard in &block.shards {
                summary.push(Self::prev_txhash(&self.fees_to, shard));
            }
            distance *= 2;
        }
        debug!(bytes = summary.len(), "built prev-txhashes summary");
        summary
    }

    fn current_height(&self) -> u32 {
        self.blocks.len().saturating_sub(1) as u32
    }

    fn current_difficulty(&self) -> Difficulty {
        self.difficulty
    }

    fn previous_blocks(&self) -> [BlockHash; NUM_PREV_IDS] {
        let mut prevs = [BlockHash::default(); NUM_PREV_IDS];
        for (prev, block) in prevs.iter_mut().zip(self.blocks.iter().rev()) {
            *prev = block.hash;
        }
        prevs
    }
}

#[cfg(test)]
mod tests {
    use coinlib::{
        EASY_DIFFICULTY, INITIAL_REWARD,
        crypto::{PrivateKey, Signature},
        template::WorkingBlock,
        types::TransactionInput,
    };
    use uuid::Uuid;

    use super::*;

    fn key() -> PrivateKey {
        PrivateKey::from_seed(&[5u8; 32]).unwrap()
    }

    fn output(value: u64, id: u128) -> TransactionOutput {
        TransactionOutput {
            value,
            unique_id: Uuid::from_u128(id),
            pubkey: key().public_key(),
        }
    }

    fn chain() -> MemChain {
        MemChain::genesis(
            vec![output(INITIAL_REWARD, 1), output(INITIAL_REWARD, 2)],
            Difficulty(EASY_DIFFICULTY),
            RewardAddress([8; 20]),
        )
        .unwrap()
    }

    fn spend_with(prevs: &[Hash], signer: &PrivateKey, value: u64, id: u128) -> Arc<Transaction> {
        let inputs = prevs
            .iter()
            .map(|prev| TransactionInput {
                prev_transaction_output_hash: *prev,
                signature: Signature::sign_output(prev, signer),
            })
            .collect();
        Arc::new(Transaction::new(inputs, vec![output(value, id)]))
    }

    fn coin(n: u128) -> Hash {
        output(INITIAL_REWARD, n).hash().unwrap()
    }

    fn mine(chain: &MemChain, txs: &[Arc<Transaction>]) -> SolvedBlock {
        let mut block = WorkingBlock::on_tip(chain, 0, RewardAddress([8; 20])).unwrap();
        for tx in txs {
            let offset = block.shard(0).len() as u32;
            block.add_tx(0, offset, tx.ref_hash().unwrap(), 0).unwrap();
        }
        while block.try_solve().is_none() {
            block.advance();
        }
        block.into_solved().ok().unwrap()
    }

    #[test]
    fn genesis_funds_outputs() {
        let chain = chain();
        assert_eq!(chain.current_height(), 0);
        assert_eq!(chain.utxos().count(), 2);
        assert_eq!(chain.previous_blocks()[0], DoubleSha::of(b"genesis"));
        assert_eq!(chain.previous_blocks()[1], BlockHash::default());
    }

    #[test]
    fn revalidate_checks_inputs() {
        let chain = chain();
        let good = spend_with(&[coin(1)], &key(), 49, 10);
        assert_eq!(chain.revalidate(&good), Validity::Valid);

        let unknown = spend_with(&[coin(3)], &key(), 1, 11);
        assert_eq!(chain.revalidate(&unknown), Validity::InvalidInput(0));

        let repeated = spend_with(&[coin(1), coin(1)], &key(), 1, 12);
        assert_eq!(chain.revalidate(&repeated), Validity::InvalidInput(1));

        let stranger = PrivateKey::from_seed(&[6u8; 32]).unwrap();
        let forged = spend_with(&[coin(2)], &stranger, 1, 13);
        assert_eq!(chain.revalidate(&forged), Validity::InvalidInput(0));

        let greedy = spend_with(&[coin(1)], &key(), INITIAL_REWARD + 1, 14);
        assert_eq!(chain.revalidate(&greedy), Validity::Overspend);
    }

    #[test]
    fn connect_then_disconnect() {
        let mut chain = chain();
        let tx = spend_with(&[coin(1)], &key(), 40, 20);
        let mut pool = PendingPool::new();
        pool.add(Arc::clone(&tx), &mut (), &mut ());

        let block = mine(&chain, &[Arc::clone(&tx)]);
        chain.connect(&block, &pool).unwrap();
        assert_eq!(chain.current_height(), 1);
        assert_eq!(chain.tip(), block.hash);
        assert!(chain.is_in_main_chain(&tx.hash().unwrap()));
        assert_eq!(chain.revalidate(&tx), Validity::InvalidInput(0));

        let pool = pool.reconcile(&chain, &mut ());
        assert!(pool.is_empty());

        let returned = chain.disconnect().unwrap();
        assert_eq!(returned, vec![Arc::clone(&tx)]);
        assert_eq!(chain.current_height(), 0);
        assert!(!chain.is_in_main_chain(&tx.hash().unwrap()));
        assert_eq!(chain.revalidate(&tx), Validity::Valid);
        assert_eq!(chain.utxos().count(), 2);
        assert!(chain.disconnect().is_none());
    }

    #[test]
    fn connect_rejects_double_spend_within_block() {
        let mut chain = chain();
        let first = spend_with(&[coin(1)], &key(), 40, 30);
        let second = spend_with(&[coin(1)], &key(), 30, 31);
        let mut pool = PendingPool::new();
        pool.add(Arc::clone(&first), &mut (), &mut ());
        pool.add(Arc::clone(&second), &mut (), &mut ());

        let block = mine(&chain, &[first, second]);
        assert!(chain.connect(&block, &pool).is_err());
        assert_eq!(chain.current_height(), 0);
        assert_eq!(chain.utxos().count(), 2);
    }

    #[test]
    fn failed_connect_leaves_chain_untouched() {
        let mut chain = chain();
        let pooled = spend_with(&[coin(1)], &key(), 40, 50);
        let unknown = spend_with(&[coin(2)], &key(), 40, 51);
        let mut pool = PendingPool::new();
        pool.add(Arc::clone(&pooled), &mut (), &mut ());

        let block = mine(&chain, &[Arc::clone(&pooled), unknown]);
        assert!(chain.connect(&block, &pool).is_err());
        assert_eq!(chain.current_height(), 0);
        assert_eq!(chain.utxos().count(), 2);
        assert!(!chain.is_in_main_chain(&pooled.hash().unwrap()));
        assert_eq!(chain.revalidate(&pooled), Validity::Valid);

        let pool = pool.reconcile(&chain, &mut ());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn connect_rejects_unknown_and_stale_blocks() {
        let mut chain = chain();
        let tx = spend_with(&[coin(2)], &key(), 40, 40);
        let block = mine(&chain, &[tx]);
        assert!(chain.connect(&block, &PendingPool::new()).is_err());

        let empty = mine(&chain, &[]);
        chain.connect(&empty, &PendingPool::new()).unwrap();
        assert!(chain.connect(&empty, &PendingPool::new()).is_err());
    }

    #[test]
    fn summary_walks_back_in_powers_of_two() {
        let mut chain = chain();
        assert_eq!(chain.current_tip_summary().len(), 1);

        for _ in 0..4 {
            let block = mine(&chain, &[]);
            chain.connect(&block, &PendingPool::new()).unwrap();
        }
        // Five blocks: distances 1, 2 and 4.
        assert_eq!(chain.current_tip_summary().len(), 3);
    }
}
