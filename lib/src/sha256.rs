use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha256::digest;

use crate::{
    U256,
    error::{CoinError, Result},
};

/// Content hash of any serialisable value, used for transaction ids.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(U256);
impl Hash {
    pub fn hash<T: serde::Serialize>(data: &T) -> Result<Self> {
        let mut serialized: Vec<u8> = vec![];
        ciborium::into_writer(data, &mut serialized)
            .map_err(|e| CoinError::Serialization(e.to_string()))?;

        let hash = digest(&serialized);
        let Ok(hash_bytes) = hex::decode(hash) else {
            return Err(CoinError::InvalidHash);
        };

        let hash_array: [u8; 32] = hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoinError::InvalidHash)?;

        Ok(Hash(U256::from_little_endian(&hash_array)))
    }

    pub fn zero() -> Self {
        Hash(U256::zero())
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_little_endian()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// SHA-256 applied twice. Everything that goes into a block header is hashed
/// this way.
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DoubleSha(pub [u8; 32]);
impl DoubleSha {
    pub fn of(data: &[u8]) -> Self {
        Self::finalize(Sha256::new().chain_update(data))
    }

    /// Finishes a running context, then hashes the digest once more.
    pub fn finalize(ctx: Sha256) -> Self {
        let first = ctx.finalize();
        Self(Sha256::digest(first).into())
    }

    /// Digest read as a big-endian integer.
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn beats_target(&self, target: U256) -> bool {
        self.to_u256() < target
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DoubleSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for DoubleSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DoubleSha({self})")
    }
}
