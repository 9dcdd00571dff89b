//! Wire format between a node and its generator process.
//!
//! The node writes the prev-txhashes summary plus a single "go" byte, then
//! a stream of fixed-size [`GenUpdate`] records. Once the generator beats
//! its target it writes one block frame followed by one shard frame per
//! shard. Every integer is little-endian.

use std::io::{ErrorKind as IoErrorKind, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{CoinError, Result},
    sha256::DoubleSha,
    types::{
        BlockHash, BlockHeader, BlockTailer, HEADER_LEN, SolvedBlock, TAILER_LEN, TxRefHash,
        read_u32,
    },
    util::MerkleRoot,
};

pub const PKT_BLOCK: u32 = 1;
pub const PKT_SHARD: u32 = 2;
pub const ECODE_NONE: u16 = 0;
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;
const FRAME_HEADER_LEN: usize = 8;
const SHARD_PREFIX_LEN: usize = 32 + 2 + 2;

/// Place this transaction reference at `offset` within `shard`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenUpdate {
    pub shard: u32,
    pub offset: u32,
    pub features: u32,
    pub hash: TxRefHash,
}

impl GenUpdate {
    pub const LEN: usize = 12 + 32;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0..4].copy_from_slice(&self.shard.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.features.to_le_bytes());
        bytes[12..].copy_from_slice(&self.hash.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[12..]);
        Self {
            shard: read_u32(&bytes[0..]),
            offset: read_u32(&bytes[4..]),
            features: read_u32(&bytes[8..]),
            hash: TxRefHash(hash),
        }
    }

    pub fn send(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub async fn send_async(&self, stream: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        stream.write_all(&self.to_bytes()).await?;
        Ok(())
    }

    /// Blocks until a whole record is in. `None` means the stream ended
    /// cleanly between records; ending inside one is an error.
    pub fn receive(stream: &mut impl Read) -> Result<Option<Self>> {
        let mut bytes = [0u8; Self::LEN];
        if !read_all_or_nothing(stream, &mut bytes)? {
            return Ok(None);
        }
        Ok(Some(Self::from_bytes(&bytes)))
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Fills `buf`, returning `false` if the stream was already at its end.
fn read_all_or_nothing(stream: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut off = 0;
    while off < buf.len() {
        match stream.read(&mut buf[off..]) {
            Ok(0) if off == 0 => return Ok(false),
            Ok(0) => {
                return Err(CoinError::Truncated {
                    expected: buf.len(),
                    got: off,
                });
            }
            Ok(n) => off += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Summary bytes followed by the go byte.
pub fn send_prelude(stream: &mut impl Write, prev_txhashes: &[u8]) -> Result<()> {
    stream.write_all(prev_txhashes)?;
    stream.write_all(&[1])?;
    Ok(())
}

pub async fn send_prelude_async(
    stream: &mut (impl AsyncWrite + Unpin),
    prev_txhashes: &[u8],
) -> Result<()> {
    stream.write_all(prev_txhashes).await?;
    stream.write_all(&[1]).await?;
    Ok(())
}

/// `None` when the node hung up before saying go.
pub fn receive_prelude(stream: &mut impl Read, num_prev_txhashes: usize) -> Result<Option<Vec<u8>>> {
    let mut bytes = vec![0u8; num_prev_txhashes + 1];
    match read_all_or_nothing(stream, &mut bytes) {
        Ok(true) => {
            bytes.truncate(num_prev_txhashes);
            Ok(Some(bytes))
        }
        Ok(false) | Err(CoinError::Truncated { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let len = (FRAME_HEADER_LEN + self.payload.len()) as u32;
        let mut bytes = Vec::with_capacity(len as usize);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&self.kind.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    fn payload_len(header: &[u8; FRAME_HEADER_LEN]) -> Result<usize> {
        let len = read_u32(&header[0..]) as usize;
        if !(FRAME_HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
            return Err(CoinError::MalformedFrame("frame length"));
        }
        Ok(len - FRAME_HEADER_LEN)
    }

    pub fn send(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_all(&self.encode())?;
        Ok(())
    }

    pub async fn send_async(&self, stream: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        stream.write_all(&self.encode()).await?;
        Ok(())
    }

    pub fn receive(stream: &mut impl Read) -> Result<Self> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        stream.read_exact(&mut header)?;
        let mut payload = vec![0u8; Self::payload_len(&header)?];
        stream.read_exact(&mut payload)?;
        Ok(Self {
            kind: read_u32(&header[4..]),
            payload,
        })
    }

    pub async fn receive_async(stream: &mut (impl AsyncRead + Unpin)) -> Result<Self> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let mut payload = vec![0u8; Self::payload_len(&header)?];
        stream.read_exact(&mut payload).await?;
        Ok(Self {
            kind: read_u32(&header[4..]),
            payload,
        })
    }

    fn expect(self, kind: u32) -> Result<Vec<u8>> {
        if self.kind != kind {
            return Err(CoinError::UnexpectedFrame {
                expected: kind,
                got: self.kind,
            });
        }
        Ok(self.payload)
    }
}

/// Header, shard counts, shard roots, prev-txhashes summary, tailer.
pub fn block_frame(block: &SolvedBlock) -> Frame {
    let mut payload = block.header.to_bytes();
    payload.extend_from_slice(&block.num_txs);
    for merkle in &block.merkles {
        payload.extend_from_slice(merkle.as_bytes());
    }
    payload.extend_from_slice(&block.prev_txhashes);
    payload.extend_from_slice(&block.tailer.to_bytes());
    Frame {
        kind: PKT_BLOCK,
        payload,
    }
}

pub fn shard_frame(block: &SolvedBlock, shard: usize) -> Frame {
    let hashes = &block.shards[shard];
    let mut payload = Vec::with_capacity(SHARD_PREFIX_LEN + hashes.len() * 32);
    payload.extend_from_slice(block.hash.as_bytes());
    payload.extend_from_slice(&(shard as u16).to_le_bytes());
    payload.extend_from_slice(&ECODE_NONE.to_le_bytes());
    for hash in hashes {
        payload.extend_from_slice(&hash.0);
    }
    Frame {
        kind: PKT_SHARD,
        payload,
    }
}

pub fn solution_frames(block: &SolvedBlock) -> Vec<Frame> {
    std::iter::once(block_frame(block))
        .chain((0..block.num_shards()).map(|shard| shard_frame(block, shard)))
        .collect()
}

pub fn send_solution(stream: &mut impl Write, block: &SolvedBlock) -> Result<()> {
    for frame in solution_frames(block) {
        frame.send(stream)?;
    }
    stream.flush()?;
    Ok(())
}

pub async fn send_solution_async(
    stream: &mut (impl AsyncWrite + Unpin),
    block: &SolvedBlock,
) -> Result<()> {
    for frame in solution_frames(block) {
        frame.send_async(stream).await?;
    }
    stream.flush().await?;
    Ok(())
}

pub fn receive_solution(stream: &mut impl Read) -> Result<SolvedBlock> {
    let mut solution = SolutionReader::new(Frame::receive(stream)?)?;
    while !solution.is_complete() {
        solution.push_shard(Frame::receive(stream)?)?;
    }
    solution.finish()
}

pub async fn receive_solution_async(stream: &mut (impl AsyncRead + Unpin)) -> Result<SolvedBlock> {
    let mut solution = SolutionReader::new(Frame::receive_async(stream).await?)?;
    while !solution.is_complete() {
        solution.push_shard(Frame::receive_async(stream).await?)?;
    }
    solution.finish()
}

/// Reassembles a [`SolvedBlock`] from its block frame and shard frames.
struct SolutionReader {
    header: BlockHeader,
    tailer: BlockTailer,
    num_txs: Vec<u8>,
    merkles: Vec<MerkleRoot>,
    prev_txhashes: Vec<u8>,
    shards: Vec<Vec<TxRefHash>>,
    hash: Option<BlockHash>,
}

impl SolutionReader {
    fn new(frame: Frame) -> Result<Self> {
        let payload = frame.expect(PKT_BLOCK)?;
        if payload.len() < HEADER_LEN {
            return Err(CoinError::MalformedFrame("block frame too short"));
        }
        let header = BlockHeader::from_bytes(&payload[..HEADER_LEN])?;
        let num_shards = header.num_shards();
        let num_prev = header.num_prev_txhashes as usize;
        let expected = (num_shards * 33)
            .checked_add(num_prev)
            .and_then(|len| len.checked_add(HEADER_LEN + TAILER_LEN));
        if expected != Some(payload.len()) {
            return Err(CoinError::MalformedFrame("block frame length"));
        }

        let mut off = HEADER_LEN;
        let num_txs = payload[off..off + num_shards].to_vec();
        off += num_shards;
        let merkles = payload[off..off + num_shards * 32]
            .chunks_exact(32)
            .map(|chunk| {
                let mut root = [0u8; 32];
                root.copy_from_slice(chunk);
                MerkleRoot(DoubleSha(root))
            })
            .collect();
        off += num_shards * 32;
        let prev_txhashes = payload[off..off + num_prev].to_vec();
        off += num_prev;
        let tailer = BlockTailer::from_bytes(&payload[off..])?;

        Ok(Self {
            header,
            tailer,
            num_txs,
            merkles,
            prev_txhashes,
            shards: Vec::with_capacity(num_shards),
            hash: None,
        })
    }

    fn is_complete(&self) -> bool {
        self.shards.len() == self.num_txs.len()
    }

    fn push_shard(&mut self, frame: Frame) -> Result<()> {
        let payload = frame.expect(PKT_SHARD)?;
        if payload.len() < SHARD_PREFIX_LEN || (payload.len() - SHARD_PREFIX_LEN) % 32 != 0 {
            return Err(CoinError::MalformedFrame("shard frame length"));
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&payload[..32]);
        let hash = DoubleSha(hash);
        match self.hash {
            Some(seen) if seen != hash => {
                return Err(CoinError::MalformedFrame("shard frames disagree on block"));
            }
            _ => self.hash = Some(hash),
        }

        let shard = le_u16(&payload[32..]) as usize;
        if shard != self.shards.len() {
            return Err(CoinError::MalformedFrame("shard out of order"));
        }
        if le_u16(&payload[34..]) != ECODE_NONE {
            return Err(CoinError::MalformedFrame("shard reported an error"));
        }

        let hashes: Vec<TxRefHash> = payload[SHARD_PREFIX_LEN..]
            .chunks_exact(32)
            .map(|chunk| {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(chunk);
                TxRefHash(hash)
            })
            .collect();
        if hashes.len() != self.num_txs[shard] as usize {
            return Err(CoinError::MalformedFrame("shard count mismatch"));
        }
        self.shards.push(hashes);
        Ok(())
    }

    fn finish(self) -> Result<SolvedBlock> {
        let hash = self
            .hash
            .ok_or(CoinError::MalformedFrame("no shard frames"))?;
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
