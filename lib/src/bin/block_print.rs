use coinlib::{error::Result, types::SolvedBlock, util::Saveable};
use std::env;

fn main() -> Result<()> {
    let Some(path) = env::args().nth(1) else {
        eprintln!("Usage: block_print <block_file> [--shards]");
        std::process::exit(1);
    };
    let show_shards = env::args().nth(2).is_some_and(|arg| arg == "--shards");

    let block = SolvedBlock::load_from_file(path)?;
    let header = &block.header;

    println!("hash:         {}", block.hash);
    println!("valid:        {}", block.verify()?);
    println!("height:       {}", header.height);
    println!("version:      {}", header.version);
    println!("prev:         {}", header.prevs[0]);
    println!("fees to:      {}", header.fees_to);
    println!("features:     {:#010b}", header.features_vote);
    println!("nonce2:       {}", hex::encode(header.nonce2));
    println!("timestamp:    {}", block.tailer.timestamp);
    println!("nonce1:       {}", block.tailer.nonce1);
    println!("difficulty:   {}", block.tailer.difficulty);
    println!("transactions: {}", block.num_transactions());
    println!("shards:       {}", block.num_shards());

    for (i, (count, merkle)) in block.num_txs.iter().zip(&block.merkles).enumerate() {
        if *count == 0 && !show_shards {
            continue;
        }
        println!("  shard {i:>5}: {count:>3} txs, root {}", merkle.0);
        if show_shards {
            for hash in block.shards.get(i).into_iter().flatten() {
                println!("    {}", hex::encode(hash.0));
            }
        }
    }
    Ok(())
}
