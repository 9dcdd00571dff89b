use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoinError {
    #[error("invalid hash")]
    InvalidHash,
    #[error("failed to serialise data: {0}")]
    Serialization(String),
    #[error("invalid difficulty {0:#010x}")]
    InvalidDifficulty(u32),
    #[error("shard order {0} exceeds the protocol maximum")]
    InvalidShardOrder(u8),
    #[error("shard {shard} out of range for {num_shards} shards")]
    ShardOutOfRange { shard: u32, num_shards: u32 },
    #[error("shard {shard} already holds the maximum number of transactions")]
    ShardFull { shard: u32 },
    #[error("offset {offset} past the {count} transactions of shard {shard}")]
    OffsetOutOfRange { shard: u32, offset: u32, count: u32 },
    #[error("truncated record: got {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },
    #[error("unexpected frame type {got:#x}, wanted {expected:#x}")]
    UnexpectedFrame { expected: u32, got: u32 },
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("invalid reward address")]
    InvalidAddress,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoinError>;
