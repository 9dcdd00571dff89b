//! The block being mined.
//!
//! Hashing a header means hashing the summary of earlier transactions, the
//! hash of all shard merkle roots, the fixed header fields and the shard
//! counts, and finally the tailer. Everything before the tailer is kept as a
//! running SHA-256 state (`partial`) so that each hash attempt only feeds the
//! twelve tailer bytes into a copy of it. Adding a transaction or bumping the
//! slow nonce invalidates that state and it is rebuilt on the spot.

use chrono::Utc;
use sha2::Sha256;
use tracing::{debug, info};

use crate::{
    MAX_SHARD_ORDER, MAX_SHARD_TXS, NONCE2_LEN, NUM_FEATURES, NUM_PREV_IDS, PROTOCOL_VERSION, U256,
    chain::ChainQuery,
    error::{CoinError, Result},
    network::GenUpdate,
    sha256::DoubleSha,
    types::{
        BlockHash, BlockHeader, BlockTailer, Difficulty, RewardAddress, SolvedBlock, TxRefHash,
        finish_hash, pre_tailer_hash,
    },
    util::{MerkleRoot, hash_of_merkles},
};

pub struct WorkingBlock {
    feature_counts: [u32; NUM_FEATURES],
    num_trans: u32,
    header: BlockHeader,
    num_txs: Vec<u8>,
    merkles: Vec<MerkleRoot>,
    shards: Vec<Vec<TxRefHash>>,
    prev_txhashes: Vec<u8>,
    hash_of_prev_txhashes: DoubleSha,
    hash_of_merkles: DoubleSha,
    tailer: BlockTailer,
    target: U256,
    partial: Sha256,
    solved: Option<BlockHash>,
}

impl WorkingBlock {
    pub fn create(
        prevs: [BlockHash; NUM_PREV_IDS],
        difficulty: Difficulty,
        prev_txhashes: Vec<u8>,
        height: u32,
        shard_order: u8,
        fees_to: RewardAddress,
    ) -> Result<Self> {
        if shard_order > MAX_SHARD_ORDER {
            return Err(CoinError::InvalidShardOrder(shard_order));
        }
        let target = difficulty.target()?;
        let num_shards = 1usize << shard_order;

        let header = BlockHeader {
            version: PROTOCOL_VERSION,
            features_vote: 0,
            shard_order,
            nonce2: [0; NONCE2_LEN],
            prevs,
            num_prev_txhashes: prev_txhashes.len() as u32,
            height,
            fees_to,
        };
        let tailer = BlockTailer {
            timestamp: current_time(),
            nonce1: 0,
            difficulty,
        };

        // The summary of earlier transactions never changes for this block.
        let hash_of_prev_txhashes = DoubleSha::of(&prev_txhashes);
        let merkles = vec![MerkleRoot::calculate(&[]); num_shards];
        let hash_of_merkles = hash_of_merkles(&merkles);
        let num_txs = vec![0u8; num_shards];
        let partial = pre_tailer_hash(&hash_of_prev_txhashes, &hash_of_merkles, &header, &num_txs);

        info!(height, shard_order, %difficulty, "created working block");

        Ok(Self {
            feature_counts: [0; NUM_FEATURES],
            num_trans: 0,
            header,
            num_txs,
            merkles,
            shards: vec![Vec::new(); num_shards],
            prev_txhashes,
            hash_of_prev_txhashes,
            hash_of_merkles,
            tailer,
            target,
            partial,
            solved: None,
        })
    }

    /// Template on top of the chain's current tip.
    pub fn on_tip<C: ChainQuery>(chain: &C, shard_order: u8, fees_to: RewardAddress) -> Result<Self> {
        Self::create(
            chain.previous_blocks(),
            chain.current_difficulty(),
            chain.current_tip_summary(),
            chain.current_height().saturating_add(1),
            shard_order,
            fees_to,
        )
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn tailer(&self) -> &BlockTailer {
        &self.tailer
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn num_transactions(&self) -> u32 {
        self.num_trans
    }

    pub fn shard(&self, shard: usize) -> &[TxRefHash] {
        &self.shards[shard]
    }

    pub fn merkle(&self, shard: usize) -> MerkleRoot {
        self.merkles[shard]
    }

    pub fn hash_of_merkles(&self) -> DoubleSha {
        self.hash_of_merkles
    }

    pub fn feature_counts(&self) -> &[u32; NUM_FEATURES] {
        &self.feature_counts
    }

    /// Digest of the running pre-tailer state, to observe when it changes.
    pub fn partial_digest(&self) -> DoubleSha {
        DoubleSha::finalize(self.partial.clone())
    }

    pub fn apply(&mut self, update: &GenUpdate) -> Result<()> {
        self.add_tx(update.shard, update.offset, update.hash, update.features)
    }

    /// Inserts a transaction reference at `offset` within `shard`. Only the
    /// low [`NUM_FEATURES`] bits of `features` are counted.
    pub fn add_tx(&mut self, shard: u32, offset: u32, hash: TxRefHash, features: u32) -> Result<()> {
        let num_shards = self.shards.len() as u32;
        if shard >= num_shards {
            return Err(CoinError::ShardOutOfRange { shard, num_shards });
        }
        let index = shard as usize;
        let count = self.num_txs[index];
        if count as usize >= MAX_SHARD_TXS {
            return Err(CoinError::ShardFull { shard });
        }
        if offset > count as u32 {
            return Err(CoinError::OffsetOutOfRange {
                shard,
                offset,
                count: count as u32,
            });
        }

        self.shards[index].insert(offset as usize, hash);
        self.num_txs[index] = count + 1;
        self.num_trans += 1;

        self.merkles[index] = MerkleRoot::calculate(&self.shards[index]);
        self.hash_of_merkles = hash_of_merkles(&self.merkles);

        for (bit, votes) in self.feature_counts.iter_mut().enumerate() {
            if features & (1 << bit) != 0 {
                *votes += 1;
            }
        }
        self.header.features_vote = self.majority_features();

        self.update_partial_hash();
        self.solved = None;
        debug!(shard, offset, total = self.num_trans, "added transaction to working block");
        Ok(())
    }

    /// A feature is voted for only when strictly more than half of the
    /// block's transactions support it.
    fn majority_features(&self) -> u8 {
        self.feature_counts
            .iter()
            .enumerate()
            .filter(|&(_, &votes)| votes * 2 > self.num_trans)
            .fold(0u8, |vote, (bit, _)| vote | 1 << bit)
    }

    fn update_partial_hash(&mut self) {
        self.partial = pre_tailer_hash(
            &self.hash_of_prev_txhashes,
            &self.hash_of_merkles,
            &self.header,
            &self.num_txs,
        );
    }

    /// Seeds the slow nonce, so parallel generators on the same tip search
    /// different spaces.
    pub fn set_nonce2(&mut self, seed: &[u8]) {
        let len = seed.len().min(NONCE2_LEN);
        self.header.nonce2 = [0; NONCE2_LEN];
        self.header.nonce2[..len].copy_from_slice(&seed[..len]);
        self.update_partial_hash();
        self.solved = None;
    }

    /// Hashes the header with the current tailer. Leaves the tailer alone
    /// either way; call [`advance`](Self::advance) before trying again.
    pub fn try_solve(&mut self) -> Option<BlockHash> {
        let sha = finish_hash(&self.partial, &self.tailer);
        if sha.beats_target(self.target) {
            self.solved = Some(sha);
            return Some(sha);
        }
        None
    }

    /// Moves to the next nonce. Refreshes the timestamp every 2^16 attempts
    /// and, when the tailer nonce wraps completely, bumps the slow nonce in
    /// the header and rebuilds the partial hash.
    pub fn advance(&mut self) {
        self.solved = None;
        self.tailer.nonce1 = self.tailer.nonce1.wrapping_add(1);

        if self.tailer.nonce1 & 0xFFFF == 0 {
            self.tailer.timestamp = current_time();

            if self.tailer.nonce1 == 0 {
                increment_nonce2(&mut self.header.nonce2);
                self.update_partial_hash();
            }
        }
    }

    /// Hands over the finished block, or gives the template back if no
    /// attempt has succeeded since the contents or nonces last changed.
    pub fn into_solved(self) -> std::result::Result<SolvedBlock, Self> {
        let Some(hash) = self.solved else {
            return Err(self);
        };

        Ok(SolvedBlock {
            header: self.header,
            tailer: self.tailer,
            num_txs: self.num_txs,
            merkles: self.merkles,
            prev_txhashes: self.prev_txhashes,
            shards: self.shards,
            hash,
        })
    }
}

/// Little-endian increment with carry.
fn increment_nonce2(nonce2: &mut [u8; NONCE2_LEN]) {
    for byte in nonce2.iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

fn current_time() -> u32 {
    Utc::now().timestamp() as u32
}
