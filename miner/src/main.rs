use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use coinlib::{
    NUM_PREV_IDS,
    network::{receive_prelude, send_solution_async},
    search::{Search, SearchOutcome, feed_channel, spawn_feed_reader},
    template::WorkingBlock,
    types::{BlockHash, Difficulty, RewardAddress},
};

/// Searches for a block on top of the given tip. The node writes the
/// prev-txhashes summary and a go byte on stdin, then transaction
/// assignments; the solved block comes back on stdout.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Hex-encoded address that collects the fees.
    #[arg(value_parser = parse_reward_addr)]
    reward_addr: RewardAddress,
    /// Compact difficulty, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_difficulty)]
    difficulty: Difficulty,
    /// Hex-encoded previous block hashes, tip first.
    #[arg(value_parser = parse_prev_hashes)]
    prev_hashes: PrevHashes,
    #[arg(value_parser = parse_u32)]
    num_prev_txhashes: u32,
    #[arg(value_parser = parse_u32)]
    height: u32,
    #[arg(value_parser = clap::value_parser!(u8).range(..=coinlib::MAX_SHARD_ORDER as i64))]
    shard_order: u8,
    /// Seeds the slow nonce so generators on the same tip do not overlap.
    nonce: Option<String>,
    /// Disable the tracing subscriber.
    #[arg(long, default_value_t = false)]
    disable_tracing: bool,
}

#[derive(Clone, Debug)]
struct PrevHashes([BlockHash; NUM_PREV_IDS]);

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn parse_reward_addr(s: &str) -> Result<RewardAddress, String> {
    RewardAddress::from_hex(s).map_err(|_| "Invalid reward address".to_string())
}

fn parse_difficulty(s: &str) -> Result<Difficulty, String> {
    let difficulty = Difficulty(parse_u32(s)?);
    if !difficulty.is_valid() {
        return Err("Invalid difficulty".to_string());
    }
    Ok(difficulty)
}

fn parse_prev_hashes(s: &str) -> Result<PrevHashes, String> {
    let bytes = hex::decode(s).map_err(|_| "Invalid previous hashes".to_string())?;
    if bytes.len() != NUM_PREV_IDS * 32 {
        return Err(format!("Expected {NUM_PREV_IDS} previous hashes"));
    }
    let mut prevs = [BlockHash::default(); NUM_PREV_IDS];
    for (prev, chunk) in prevs.iter_mut().zip(bytes.chunks_exact(32)) {
        prev.0.copy_from_slice(chunk);
    }
    Ok(PrevHashes(prevs))
}

// Logs go to stderr: stdout carries the solution.
fn init_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut stdin = std::io::stdin();
    let Some(prev_txhashes) = receive_prelude(&mut stdin, cli.num_prev_txhashes as usize)? else {
        info!("node hung up before go");
        return Ok(());
    };

    let mut block = WorkingBlock::create(
        cli.prev_hashes.0,
        cli.difficulty,
        prev_txhashes,
        cli.height,
        cli.shard_order,
        cli.reward_addr,
    )?;
    if let Some(nonce) = &cli.nonce {
        block.set_nonce2(nonce.as_bytes());
    }

    let (sender, receiver) = feed_channel();
    spawn_feed_reader(stdin, sender);

    let outcome = tokio::task::spawn_blocking(move || Search::new(block, receiver).run())
        .await
        .context("search thread panicked")??;

    match outcome {
        SearchOutcome::Solved(block) => {
            let mut stdout = tokio::io::stdout();
            send_solution_async(&mut stdout, &block)
                .await
                .context("writing solution")?;
            info!(
                hash = %block.hash,
                height = block.header.height,
                transactions = block.num_transactions(),
                "wrote block"
            );
        }
        SearchOutcome::Abandoned => info!("node closed the feed"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if !cli.disable_tracing {
        init_tracing_subscriber();
    }

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
