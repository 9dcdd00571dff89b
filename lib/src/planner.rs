//! Decides where each pending transaction goes in the generator's block.
//!
//! The planner mirrors the generator's shards: per shard, the transactions
//! already sent, sorted by the transaction ordering. A new transaction's
//! offset is its insertion point in that list, so the generator's shard ends
//! up in the same order as the pool.

use std::sync::Arc;

use flume::Sender;
use tracing::{debug, warn};

use crate::{
    MAX_SHARD_ORDER, MAX_SHARD_TXS,
    chain::GeneratorHook,
    error::{CoinError, Result},
    mempool::PendingPool,
    network::GenUpdate,
    types::Transaction,
};

#[derive(Debug)]
pub struct ShardPlanner {
    shard_order: u8,
    features: u32,
    shards: Vec<Vec<Arc<Transaction>>>,
    deferred: usize,
}

impl ShardPlanner {
    /// `features` is the vote attached to every transaction placed.
    pub fn new(shard_order: u8, features: u32) -> Result<Self> {
        if shard_order > MAX_SHARD_ORDER {
            return Err(CoinError::InvalidShardOrder(shard_order));
        }
        Ok(Self {
            shard_order,
            features,
            shards: vec![Vec::new(); 1 << shard_order],
            deferred: 0,
        })
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, shard: usize) -> &[Arc<Transaction>] {
        &self.shards[shard]
    }

    /// Transactions turned away because their shard was full.
    pub fn deferred(&self) -> usize {
        self.deferred
    }

    /// The assignment telling the generator where `tx` goes, or `None` if it
    /// is already placed or its shard has no room left.
    pub fn place(&mut self, tx: &Arc<Transaction>) -> Result<Option<GenUpdate>> {
        let shard = tx.shard(self.shard_order)?;
        let placed = &mut self.shards[shard as usize];

        let offset = match placed.binary_search_by(|t| t.as_ref().cmp(tx)) {
            Ok(_) => return Ok(None),
            Err(offset) => offset,
        };
        if placed.len() >= MAX_SHARD_TXS {
            self.deferred += 1;
            warn!(shard, deferred = self.deferred, "shard full, deferring transaction");
            return Ok(None);
        }

        placed.insert(offset, Arc::clone(tx));
        Ok(Some(GenUpdate {
            shard,
            offset: offset as u32,
            features: self.features,
            hash: tx.ref_hash()?,
        }))
    }

    /// Assignments for everything already pending, for a fresh template.
    pub fn seed(&mut self, pool: &PendingPool) -> Result<Vec<GenUpdate>> {
        let mut updates = Vec::new();
        for tx in pool.iter() {
            if let Some(update) = self.place(tx)? {
                updates.push(update);
            }
        }
        debug!(placed = updates.len(), pending = pool.len(), "seeded shard planner");
        Ok(updates)
    }
}

/// Pool hook that plans each new transaction and queues the assignment for
/// whoever writes to the generator.
#[derive(Debug)]
pub struct PlannerFeed {
    planner: ShardPlanner,
    updates: Sender<GenUpdate>,
}

impl PlannerFeed {
    pub fn new(planner: ShardPlanner, updates: Sender<GenUpdate>) -> Self {
        Self { planner, updates }
    }

    pub fn planner(&self) -> &ShardPlanner {
        &self.planner
    }
}

impl GeneratorHook for PlannerFeed {
    fn tell_new_pending(&mut self, position: usize, tx: &Arc<Transaction>) {
        match self.planner.place(tx) {
            Ok(Some(update)) => {
                debug!(position, shard = update.shard, offset = update.offset, "queued for generator");
                if self.updates.send(update).is_err() {
                    debug!("generator feed closed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(position, "cannot plan pending transaction: {e}"),
        }
    }
}
