use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};

use ecdsa::{Signature as ECDSASignature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use k256::{Secp256k1, elliptic_curve::rand_core::OsRng};
use serde::{Deserialize, Serialize};
use spki::{DecodePublicKey, EncodePublicKey};

use crate::{sha256::Hash, util::Saveable};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Signature(pub ECDSASignature<Secp256k1>);
impl Signature {
    pub fn sign_output(output_hash: &Hash, private_key: &PrivateKey) -> Self {
        let signature = private_key.0.sign(&output_hash.as_bytes());
        Signature(signature)
    }

    pub fn verify(&self, output_hash: &Hash, public_key: &PublicKey) -> bool {
        public_key
            .0
            .verify(&output_hash.as_bytes(), &self.0)
            .is_ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PublicKey(pub VerifyingKey<Secp256k1>);
impl PublicKey {
    /// Compressed SEC1 encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PrivateKey(#[serde(with = "signkey_serde")] pub SigningKey<Secp256k1>);
impl PrivateKey {
    pub fn new_key() -> Self {
        Self(SigningKey::random(&mut OsRng))
    }

    /// Deterministic key, for fixtures.
    pub fn from_seed(seed: &[u8; 32]) -> Option<Self> {
        SigningKey::from_slice(seed).ok().map(Self)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new_key()
    }
}

impl Saveable for PublicKey {
    fn load<I: Read>(mut reader: I) -> IoResult<Self> {
        let mut pem = String::new();
        reader.read_to_string(&mut pem)?;
        let key = VerifyingKey::from_public_key_pem(&pem)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to parse public key"))?;
        Ok(PublicKey(key))
    }

    fn save<O: Write>(&self, mut writer: O) -> IoResult<()> {
        let pem = self
            .0
            .to_public_key_pem(Default::default())
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to encode public key"))?;
        writer.write_all(pem.as_bytes())
    }
}

impl Saveable for PrivateKey {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        ciborium::de::from_reader(reader)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to deserialise private key"))
    }

    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        ciborium::ser::into_writer(self, writer)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialise private key"))
    }
}

mod signkey_serde {
    use serde::{Deserialize, de::Error};

    pub fn serialize<S>(
        key: &super::SigningKey<super::Secp256k1>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&key.to_bytes())
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<super::SigningKey<super::Secp256k1>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        super::SigningKey::from_slice(&bytes).map_err(D::Error::custom)
    }
}
