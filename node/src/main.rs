use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use argh::FromArgs;
use coinlib::{
    EASY_DIFFICULTY, INITIAL_REWARD, INITIAL_SHARD_ORDER,
    chain::{ChainQuery, GeneratorHook},
    crypto::{PrivateKey, Signature},
    mempool::{AddOutcome, PendingPool},
    planner::PlannerFeed,
    types::{
        Difficulty, RewardAddress, SolvedBlock, Transaction, TransactionInput, TransactionOutput,
    },
    util::Saveable,
};
use tracing::{error, info, warn};
use uuid::Uuid;

mod chain;
mod generator;
mod util;

use chain::MemChain;
use generator::{Generator, GeneratorConfig};
use util::LogFanout;

#[derive(FromArgs)]
/// Single-node demo: funds a key, spends the funds and mines them into a block
struct Args {
    #[argh(option, default = "PathBuf::from(\"miner\")")]
    /// path to the generator binary
    generator: PathBuf,

    #[argh(option)]
    /// key pair name as written by key_gen; a fresh key is used if absent
    key: Option<String>,

    #[argh(option, default = "INITIAL_SHARD_ORDER")]
    /// log2 of the number of shards per block
    shard_order: u8,

    #[argh(option, default = "String::from(\"0x1f00ffff\")")]
    /// compact difficulty for every block
    difficulty: String,

    #[argh(option, default = "8")]
    /// number of outputs the genesis block creates and the demo spends
    fund: u64,

    #[argh(option, default = "1")]
    /// number of blocks to mine
    blocks: u32,

    #[argh(switch)]
    /// after mining, evict the tip, return its transactions to the pool and
    /// mine them again
    reorg: bool,

    #[argh(option)]
    /// seed for the generator's slow nonce
    nonce: Option<String>,

    #[argh(option, default = "PathBuf::from(\"block.cbor\")")]
    /// where the last solved block is written
    out: PathBuf,

    #[argh(switch)]
    /// disable the tracing subscriber
    disable_tracing: bool,
}

fn parse_difficulty(s: &str) -> Result<Difficulty> {
    let bits = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .with_context(|| format!("invalid difficulty {s}"))?;
    Ok(Difficulty(bits))
}

/// Everything the node owns: the pool, the chain and the generator config.
struct Node {
    pool: PendingPool,
    chain: MemChain,
    peers: LogFanout,
    config: GeneratorConfig,
}

impl Node {
    fn new(chain: MemChain, config: GeneratorConfig) -> Self {
        Self {
            pool: PendingPool::new(),
            chain,
            peers: LogFanout::default(),
            config,
        }
    }

    fn add_transaction<G: GeneratorHook>(&mut self, tx: Arc<Transaction>, generator: &mut G) {
        if let AddOutcome::Inserted(position) = self.pool.add(tx, generator, &mut self.peers) {
            info!(position, pending = self.pool.len(), "accepted transaction");
        }
    }

    /// Spends every output `key` owns back to itself, less a fee of one.
    fn spend_all(&self, key: &PrivateKey) -> Vec<Arc<Transaction>> {
        let public_key = key.public_key();
        let mut txs = Vec::new();
        for (prev, output) in self.chain.utxos() {
            if output.pubkey != public_key || output.value == 0 {
                continue;
            }
            txs.push(Arc::new(Transaction::new(
                vec![TransactionInput {
                    prev_transaction_output_hash: *prev,
                    signature: Signature::sign_output(prev, key),
                }],
                vec![TransactionOutput {
                    value: output.value - 1,
                    unique_id: Uuid::new_v4(),
                    pubkey: public_key.clone(),
                }],
            )));
        }
        txs
    }

    async fn start_generator(&self) -> Result<(Generator, PlannerFeed)> {
        Generator::spawn(&self.config, &self.chain, &self.pool).await
    }

    fn connect(&mut self, block: &SolvedBlock) -> Result<()> {
        self.chain.connect(block, &self.pool)?;
        let pool = std::mem::take(&mut self.pool);
        self.pool = pool.reconcile(&self.chain, &mut self.peers);
        info!(
            height = self.chain.current_height(),
            pending = self.pool.len(),
            "pool reconciled"
        );
        Ok(())
    }

    /// Evicts the tip block; its transactions go back to the pool.
    fn reorg(&mut self) -> Result<()> {
        let evicted = self
            .chain
            .disconnect()
            .context("nothing to disconnect above genesis")?;
        info!(evicted = evicted.len(), height = self.chain.current_height(), "disconnected tip");

        let dirty = std::mem::take(&mut self.pool).bulk_add(evicted);
        self.pool = dirty.reconcile(&self.chain, &mut self.peers);
        info!(pending = self.pool.len(), "pool restored after reorg");
        Ok(())
    }

    async fn mine_one(&mut self, spends: Vec<Arc<Transaction>>) -> Result<Option<SolvedBlock>> {
        let (mut generator, mut feed) = self.start_generator().await?;
        for tx in spends {
            self.add_transaction(tx, &mut feed);
        }
        if feed.planner().deferred() > 0 {
            warn!(deferred = feed.planner().deferred(), "some transactions wait for the next block");
        }
        drop(feed);

        let solved = tokio::select! {
            solved = generator.solution() => Some(solved),
            _ = tokio::signal::ctrl_c() => None,
        };
        match solved {
            Some(solved) => {
                let block = solved?;
                self.connect(&block)?;
                Ok(Some(block))
            }
            None => {
                info!("interrupted");
                generator.abandon().await?;
                Ok(None)
            }
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let difficulty = parse_difficulty(&args.difficulty)?;
    if difficulty.0 == EASY_DIFFICULTY {
        info!("easy difficulty: blocks may be found before transactions arrive");
    }

    let (private_key, public_key) = util::load_key(args.key.as_deref())?;
    let fees_to = RewardAddress::from_public_key(&public_key)?;
    info!(%fees_to, "mining for address");

    let outputs = (0..args.fund)
        .map(|_| TransactionOutput {
            value: INITIAL_REWARD,
            unique_id: Uuid::new_v4(),
            pubkey: public_key.clone(),
        })
        .collect();
    let chain = MemChain::genesis(outputs, difficulty, fees_to)?;
    let config = GeneratorConfig {
        program: args.generator,
        shard_order: args.shard_order,
        fees_to,
        features: 0,
        nonce: args.nonce,
    };
    let mut node = Node::new(chain, config);

    let mut last = None;
    for round in 0..args.blocks {
        let spends = if round == 0 {
            node.spend_all(&private_key)
        } else {
            Vec::new()
        };
        match node.mine_one(spends).await? {
            Some(block) => last = Some(block),
            None => break,
        }
    }

    if args.reorg && last.is_some() {
        node.reorg()?;
        if let Some(block) = node.mine_one(Vec::new()).await? {
            last = Some(block);
        }
    }

    if let Some(block) = last {
        block
            .save_to_file(&args.out)
            .with_context(|| format!("writing {}", args.out.display()))?;
        info!(
            hash = %block.hash,
            height = block.header.height,
            txs = block.num_transactions(),
            out = %args.out.display(),
            announced = node.peers.announced,
            retracted = node.peers.retracted,
            "saved block"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = argh::from_env();
    if !args.disable_tracing {
        util::init_tracing_subscriber();
    }

    if let Err(e) = run(args).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
