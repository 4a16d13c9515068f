//! Hash and CID primitives
//!
//! Fixed-width SHA-256 digests used for stamps and Merkle nodes, plus the
//! CID helpers the storage adapters use to address chunks and file records.

use cid::Cid;
use multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// SHA-256 multihash code
/// See: https://github.com/multiformats/multicodec/blob/master/table.csv
pub const SHA256_CODE: u64 = 0x12;

/// Raw binary codec, used for data chunks
pub const RAW_CODEC: u64 = 0x55;

/// Private-use codec for file records (ordered chunk lists)
pub const FILE_RECORD_CODEC: u64 = 0xcd10;

/// Width of every stamp and tree node in bytes
pub const HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Multihash error: {0}")]
    Multihash(String),
}

/// A 32-byte digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidHash(e.to_string()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = HashError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            HashError::InvalidHash(format!("expected {} bytes, got {}", HASH_LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// SHA-256 over a single buffer
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// SHA-256 over the concatenation of two nodes
pub fn sha256_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash(hasher.finalize().into())
}

/// Compute a CIDv1 for data under the given codec, SHA-256 multihash
pub fn block_cid(data: &[u8], codec: u64) -> Result<Cid, HashError> {
    let hash = sha256(data);
    let mh = Multihash::wrap(SHA256_CODE, hash.as_bytes())
        .map_err(|e| HashError::Multihash(format!("Failed to create multihash: {}", e)))?;
    Ok(Cid::new_v1(codec, mh))
}

/// Verify data against a CID by recomputing it under the CID's own codec
pub fn verify_block(data: &[u8], expected: &Cid) -> Result<(), HashError> {
    let computed = block_cid(data, expected.codec())?;

    if &computed != expected {
        return Err(HashError::HashMismatch {
            expected: expected.to_string(),
            actual: computed.to_string(),
        });
    }

    Ok(())
}

/// Parse a CID from string
pub fn parse_cid_str(s: &str) -> Result<Cid, HashError> {
    s.trim()
        .parse()
        .map_err(|e| HashError::InvalidCid(format!("{}", e)))
}

/// Serde adapter that writes CIDs in their canonical string form
pub mod cid_string {
    use cid::Cid;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cid: &Cid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&cid.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Cid, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_cid_str(&s).map_err(serde::de::Error::custom)
    }
}
