use std::fmt;
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    MAX_SHARD_ORDER, NONCE2_LEN, NUM_PREV_IDS, U256,
    crypto::PublicKey,
    error::{CoinError, Result},
    sha256::{DoubleSha, Hash},
    types::TxRefHash,
    util::{MerkleRoot, Saveable, hash_of_merkles},
};

pub type BlockHash = DoubleSha;

/// Encoded size of a [`BlockHeader`].
pub const HEADER_LEN: usize = 3 + NONCE2_LEN + NUM_PREV_IDS * 32 + 4 + 4 + RewardAddress::LEN;
/// Encoded size of a [`BlockTailer`].
pub const TAILER_LEN: usize = 12;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RewardAddress(pub [u8; 20]);
impl RewardAddress {
    pub const LEN: usize = 20;

    pub fn from_public_key(public_key: &PublicKey) -> Result<Self> {
        let hash = Hash::hash(public_key)?.as_bytes();
        let mut addr = [0u8; Self::LEN];
        addr.copy_from_slice(&hash[..Self::LEN]);
        Ok(Self(addr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| CoinError::InvalidAddress)?;
        let addr = bytes.try_into().map_err(|_| CoinError::InvalidAddress)?;
        Ok(Self(addr))
    }
}

impl fmt::Display for RewardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Compact target: the top byte is a base-256 exponent, the low three bytes
/// the mantissa, so the target is `mantissa * 256^(exponent - 3)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Difficulty(pub u32);
impl Difficulty {
    pub fn target(self) -> Result<U256> {
        let exponent = (self.0 >> 24) as usize;
        let mantissa = self.0 & 0x00ff_ffff;
        if mantissa == 0 || mantissa & 0x0080_0000 != 0 {
            return Err(CoinError::InvalidDifficulty(self.0));
        }

        let mantissa = U256::from(mantissa);
        let target = if exponent <= 3 {
            mantissa >> (8 * (3 - exponent))
        } else {
            let shift = 8 * (exponent - 3);
            if mantissa.bits() + shift > 256 {
                return Err(CoinError::InvalidDifficulty(self.0));
            }
            mantissa << shift
        };

        if target.is_zero() {
            return Err(CoinError::InvalidDifficulty(self.0));
        }
        Ok(target)
    }

    pub fn is_valid(self) -> bool {
        self.target().is_ok()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Every header field except the tailer. Covered by the partial hash.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u8,
    pub features_vote: u8,
    pub shard_order: u8,
    /// Slow nonce, bumped only when the tailer nonce wraps.
    pub nonce2: [u8; NONCE2_LEN],
    pub prevs: [BlockHash; NUM_PREV_IDS],
    pub num_prev_txhashes: u32,
    pub height: u32,
    pub fees_to: RewardAddress,
}

impl BlockHeader {
    pub fn num_shards(&self) -> usize {
        1 << self.shard_order
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.push(self.version);
        bytes.push(self.features_vote);
        bytes.push(self.shard_order);
        bytes.extend_from_slice(&self.nonce2);
        for prev in &self.prevs {
            bytes.extend_from_slice(prev.as_bytes());
        }
        bytes.extend_from_slice(&self.num_prev_txhashes.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.fees_to.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(CoinError::MalformedFrame("header length"));
        }

        if bytes[2] > MAX_SHARD_ORDER {
            return Err(CoinError::MalformedFrame("shard order"));
        }

        let mut nonce2 = [0u8; NONCE2_LEN];
        nonce2.copy_from_slice(&bytes[3..3 + NONCE2_LEN]);

        let mut off = 3 + NONCE2_LEN;
        let mut prevs = [BlockHash::default(); NUM_PREV_IDS];
        for prev in prevs.iter_mut() {
            prev.0.copy_from_slice(&bytes[off..off + 32]);
            off += 32;
        }

        let num_prev_txhashes = read_u32(&bytes[off..]);
        let height = read_u32(&bytes[off + 4..]);
        off += 8;
        let mut fees_to = [0u8; RewardAddress::LEN];
        fees_to.copy_from_slice(&bytes[off..off + RewardAddress::LEN]);

        Ok(Self {
            version: bytes[0],
            features_vote: bytes[1],
            shard_order: bytes[2],
            nonce2,
            prevs,
            num_prev_txhashes,
            height,
            fees_to: RewardAddress(fees_to),
        })
    }
}

/// The part of the header that changes on every hash attempt.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTailer {
    pub timestamp: u32,
    pub nonce1: u32,
    pub difficulty: Difficulty,
}

impl BlockTailer {
    pub fn to_bytes(&self) -> [u8; TAILER_LEN] {
        let mut bytes = [0u8; TAILER_LEN];
        bytes[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.nonce1.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.difficulty.0.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TAILER_LEN {
            return Err(CoinError::MalformedFrame("tailer length"));
        }
        Ok(Self {
            timestamp: read_u32(&bytes[0..]),
            nonce1: read_u32(&bytes[4..]),
            difficulty: Difficulty(read_u32(&bytes[8..])),
        })
    }
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Hash state over everything but the tailer.
pub(crate) fn pre_tailer_hash(
    hash_of_prev_txhashes: &DoubleSha,
    hash_of_merkles: &DoubleSha,
    header: &BlockHeader,
    num_txs: &[u8],
) -> Sha256 {
    Sha256::new()
        .chain_update(hash_of_prev_txhashes.as_bytes())
        .chain_update(hash_of_merkles.as_bytes())
        .chain_update(header.to_bytes())
        .chain_update(num_txs)
}

pub(crate) fn finish_hash(partial: &Sha256, tailer: &BlockTailer) -> BlockHash {
    DoubleSha::finalize(partial.clone().chain_update(tailer.to_bytes()))
}

/// A template that beat its target, with everything needed to rebuild and
/// check its hash.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SolvedBlock {
    pub header: BlockHeader,
    pub tailer: BlockTailer,
    pub num_txs: Vec<u8>,
    pub merkles: Vec<MerkleRoot>,
    pub prev_txhashes: Vec<u8>,
    pub shards: Vec<Vec<TxRefHash>>,
    pub hash: BlockHash,
}

impl SolvedBlock {
    pub fn num_shards(&self) -> usize {
        self.header.num_shards()
    }

    pub fn num_transactions(&self) -> usize {
        self.num_txs.iter().map(|&n| n as usize).sum()
    }

    pub fn compute_hash(&self) -> BlockHash {
        let partial = pre_tailer_hash(
            &DoubleSha::of(&self.prev_txhashes),
            &hash_of_merkles(&self.merkles),
            &self.header,
            &self.num_txs,
        );
        finish_hash(&partial, &self.tailer)
    }

    /// Checks shard contents against counts and roots, the recorded hash
    /// against the contents, and the hash against the target.
    pub fn verify(&self) -> Result<bool> {
        if self.header.shard_order > MAX_SHARD_ORDER {
            return Err(CoinError::InvalidShardOrder(self.header.shard_order));
        }
        let num_shards = self.num_shards();
        if self.num_txs.len() != num_shards
            || self.merkles.len() != num_shards
            || self.shards.len() != num_shards
            || self.prev_txhashes.len() != self.header.num_prev_txhashes as usize
        {
            return Ok(false);
        }

        let contents_match = self
            .shards
            .iter()
            .zip(&self.num_txs)
            .zip(&self.merkles)
            .all(|((shard, &count), merkle)| {
                shard.len() == count as usize && MerkleRoot::calculate(shard) == *merkle
            });
        if !contents_match {
            return Ok(false);
        }

        let hash = self.compute_hash();
        Ok(hash == self.hash && hash.beats_target(self.tailer.difficulty.target()?))
    }
}

impl Saveable for SolvedBlock {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        ciborium::de::from_reader(reader)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to deserialise block"))
    }
    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        ciborium::ser::into_writer(self, writer)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialise block"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        let mut prevs = [BlockHash::default(); NUM_PREV_IDS];
        prevs[0] = DoubleSha::of(b"parent");
        BlockHeader {
            version: 1,
            features_vote: 0b101,
            shard_order: 2,
            nonce2: [4; NONCE2_LEN],
            prevs,
            num_prev_txhashes: 3,
            height: 77,
            fees_to: RewardAddress([9; 20]),
        }
    }

    #[test]
    fn header_encoding_has_fixed_layout() {
        let bytes = header().to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[..3], &[1, 0b101, 2]);
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), header());
    }

    #[test]
    fn tailer_is_little_endian() {
        let tailer = BlockTailer {
            timestamp: 0x0102_0304,
            nonce1: 1,
            difficulty: Difficulty(0x1d00_ffff),
        };
        let bytes = tailer.to_bytes();
        assert_eq!(&bytes[..4], &[4, 3, 2, 1]);
        assert_eq!(BlockTailer::from_bytes(&bytes).unwrap(), tailer);
    }

    #[test]
    fn compact_difficulty_expands() {
        let target = Difficulty(0x1d00_ffff).target().unwrap();
        assert_eq!(target, U256::from(0xffff) << 208);

        let target = Difficulty(0x0300_0001).target().unwrap();
        assert_eq!(target, U256::one());

        let easy = Difficulty(crate::EASY_DIFFICULTY).target().unwrap();
        assert_eq!(easy.bits(), 255);
    }

    #[test]
    fn bad_difficulties_are_rejected() {
        // zero mantissa, sign bit, overflow, shifted to nothing
        for bits in [0x1d00_0000, 0x1d80_0000, 0x2201_0000, 0x0100_00ff] {
            assert!(!Difficulty(bits).is_valid(), "{bits:#x}");
        }
    }

    #[test]
    fn reward_address_from_hex() {
        let addr = RewardAddress([0xab; 20]);
        assert_eq!(RewardAddress::from_hex(&addr.to_string()).unwrap(), addr);
        assert!(RewardAddress::from_hex("abcd").is_err());
        assert!(RewardAddress::from_hex("zz").is_err());
    }
}
