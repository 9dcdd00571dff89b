pub const INITIAL_REWARD: u64 = 50;
pub const PROTOCOL_VERSION: u8 = 1;
/// How many earlier blocks a header links back to.
pub const NUM_PREV_IDS: usize = 10;
/// A shard's transaction count is a single byte.
pub const MAX_SHARD_TXS: usize = 255;
/// Width of the header's feature-vote bitmap.
pub const NUM_FEATURES: usize = 8;
pub const NONCE2_LEN: usize = 13;
pub const INITIAL_SHARD_ORDER: u8 = 2;
/// Shard indices travel as `u16` in shard frames.
pub const MAX_SHARD_ORDER: u8 = 16;
/// Roughly every other hash beats this target.
pub const EASY_DIFFICULTY: u32 = 0x207f_ffff;

pub mod chain;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod network;
pub mod planner;
pub mod search;
pub mod sha256;
pub mod template;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

use serde::{Deserialize, Serialize};
use uint::construct_uint;

construct_uint! {
    #[derive(Serialize, Deserialize)]
    pub struct U256(4);
}
