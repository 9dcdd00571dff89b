//! Runs the miner as a child process and talks the feed protocol to it.

use std::{path::PathBuf, process::Stdio};

use anyhow::{Context, Result, ensure};
use coinlib::{
    chain::ChainQuery,
    mempool::PendingPool,
    network::{GenUpdate, receive_solution_async, send_prelude_async},
    planner::{PlannerFeed, ShardPlanner},
    types::{RewardAddress, SolvedBlock},
};
use flume::Sender;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub program: PathBuf,
    pub shard_order: u8,
    pub fees_to: RewardAddress,
    pub features: u32,
    pub nonce: Option<String>,
}

impl GeneratorConfig {
    /// Command line for a block on top of `chain`'s tip.
    pub fn args<C: ChainQuery>(&self, chain: &C, num_prev_txhashes: usize) -> Vec<String> {
        let prevs: Vec<u8> = chain.previous_blocks().iter().flat_map(|prev| prev.0).collect();
        let mut args = vec![
            self.fees_to.to_string(),
            format!("{:#x}", chain.current_difficulty().0),
            hex::encode(prevs),
            num_prev_txhashes.to_string(),
            chain.current_height().saturating_add(1).to_string(),
            self.shard_order.to_string(),
        ];
        args.extend(self.nonce.clone());
        args
    }
}

pub struct Generator {
    child: Child,
    stdout: ChildStdout,
    updates: Sender<GenUpdate>,
    writer: JoinHandle<Result<()>>,
}

impl Generator {
    /// Starts a miner on the current tip and hands it everything already
    /// pending. The returned feed plans later arrivals for the same miner.
    pub async fn spawn<C: ChainQuery>(
        config: &GeneratorConfig,
        chain: &C,
        pool: &PendingPool,
    ) -> Result<(Self, PlannerFeed)> {
        let summary = chain.current_tip_summary();
        let args = config.args(chain, summary.len());
        debug!(program = %config.program.display(), ?args, "spawning generator");

        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("running {}", config.program.display()))?;
        let mut stdin = child.stdin.take().context("generator has no stdin")?;
        let stdout = child.stdout.take().context("generator has no stdout")?;

        send_prelude_async(&mut stdin, &summary).await?;

        let mut planner = ShardPlanner::new(config.shard_order, config.features)?;
        let (updates, queued) = flume::unbounded::<GenUpdate>();
        for update in planner.seed(pool)? {
            updates.send(update)?;
        }

        // Closing stdin tells the generator to give up.
        let writer = tokio::spawn(async move {
            while let Ok(update) = queued.recv_async().await {
                update.send_async(&mut stdin).await?;
                stdin.flush().await?;
            }
            Ok::<_, anyhow::Error>(())
        });

        info!(
            height = chain.current_height().saturating_add(1),
            seeded = updates.len(),
            "generator started"
        );
        let feed = PlannerFeed::new(planner, updates.clone());
        Ok((
            Self {
                child,
                stdout,
                updates,
                writer,
            },
            feed,
        ))
    }

    /// Waits for the solved block and checks it before handing it over.
    pub async fn solution(&mut self) -> Result<SolvedBlock> {
        let block = receive_solution_async(&mut self.stdout)
            .await
            .context("reading generator solution")?;
        ensure!(block.verify()?, "generator produced invalid block {}", block.hash);

        let status = self.child.wait().await?;
        ensure!(status.success(), "generator exited with {status}");
        self.writer.abort();

        info!(hash = %block.hash, txs = block.num_transactions(), "generator solved block");
        Ok(block)
    }

    /// Hangs up on the generator and waits for it to leave.
    pub async fn abandon(mut self) -> Result<()> {
        drop(self.updates);
        // Dropping the writer closes the generator's stdin.
        self.writer.abort();
        if let Ok(Err(e)) = self.writer.await {
            warn!("generator feed: {e:#}");
        }
        let status = self.child.wait().await?;
        info!(%status, "generator abandoned");
        Ok(())
    }
}
