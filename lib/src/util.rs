use std::{
    fs::File,
    io::{Read, Result as IoResult, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{sha256::DoubleSha, types::TxRefHash};

pub trait Saveable
where
    Self: Sized,
{
    fn load<I: Read>(reader: I) -> IoResult<Self>;
    fn save<O: Write>(&self, writer: O) -> IoResult<()>;

    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> IoResult<()> {
        let file = File::create(&path)?;
        self.save(file)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        let file = File::open(&path)?;
        Self::load(file)
    }
}

/// Root of one shard's ordered transaction reference hashes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MerkleRoot(pub DoubleSha);
impl MerkleRoot {
    /// An empty shard has the all-zero root.
    pub fn calculate(hashes: &[TxRefHash]) -> Self {
        if hashes.is_empty() {
            return Self::default();
        }

        let mut layer: Vec<DoubleSha> = hashes.iter().map(|h| DoubleSha::of(&h.0)).collect();

        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    DoubleSha::finalize(Sha256::new().chain_update(left.0).chain_update(right.0))
                })
                .collect()
        }

        Self(layer[0])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// Double SHA-256 over the concatenation of every shard root.
pub fn hash_of_merkles(merkles: &[MerkleRoot]) -> DoubleSha {
    let mut ctx = Sha256::new();
    for merkle in merkles {
        ctx.update(merkle.as_bytes());
    }
    DoubleSha::finalize(ctx)
}
