//! Leaf stamping and the stamp function registry
//!
//! A stamp is the 32-byte commitment to a leaf that goes into the Merkle
//! tree. Builder and verifier must run the identical function, so functions
//! are always referred to by id: a closed set of builtins plus one explicit
//! custom slot.
//!
//! # Canonical leaf encoding
//!
//! Every builtin hashes the same byte string:
//!
//! ```text
//! "prooforacle/leaf/v1" 0x00
//! u32_be(len(cid_bytes)) cid_bytes
//! u64_be(timestamp)
//! 0x00                              (no salt)
//! 0x01 u32_be(len(salt)) salt       (salt present)
//! ```

use cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;
use crate::hash::{cid_string, sha256, Hash};

const LEAF_DOMAIN: &[u8] = b"prooforacle/leaf/v1";

/// Id of the default stamp function
pub const DEFAULT_STAMP_FUNCTION: &str = "default-sha256";

/// Id of the BLAKE3 stamp function
pub const BLAKE3_STAMP_FUNCTION: &str = "blake3";

/// One file's entry in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    #[serde(with = "cid_string")]
    pub identifier: Cid,
    pub timestamp: u64,
    #[serde(default, with = "salt_hex", skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
}

impl Leaf {
    pub fn new(identifier: Cid, timestamp: u64) -> Self {
        Self {
            identifier,
            timestamp,
            salt: None,
        }
    }

    pub fn with_salt(identifier: Cid, timestamp: u64, salt: Vec<u8>) -> Self {
        Self {
            identifier,
            timestamp,
            salt: Some(salt),
        }
    }

    /// Canonical byte encoding hashed by the builtin stamp functions
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let id = self.identifier.to_bytes();
        let salt_len = self.salt.as_ref().map(|s| 5 + s.len()).unwrap_or(1);
        let mut buf = Vec::with_capacity(LEAF_DOMAIN.len() + 1 + 4 + id.len() + 8 + salt_len);

        buf.extend_from_slice(LEAF_DOMAIN);
        buf.push(0x00);
        buf.extend_from_slice(&(id.len() as u32).to_be_bytes());
        buf.extend_from_slice(&id);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        match &self.salt {
            None => buf.push(0x00),
            Some(salt) => {
                buf.push(0x01);
                buf.extend_from_slice(&(salt.len() as u32).to_be_bytes());
                buf.extend_from_slice(salt);
            }
        }

        buf
    }
}

/// A caller-provided stamp function occupying the custom slot
#[derive(Clone, Copy)]
pub struct CustomStamp {
    id: &'static str,
    func: fn(&Leaf) -> Hash,
}

impl CustomStamp {
    /// Name a custom stamp function
    ///
    /// The id is what gets recorded in the timestamped root, so a verifier
    /// has to register the same function under the same id.
    pub fn new(id: &'static str, func: fn(&Leaf) -> Hash) -> Result<Self, ConfigError> {
        if id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "custom stamp function id must not be empty".to_string(),
            ));
        }
        if id == DEFAULT_STAMP_FUNCTION || id == BLAKE3_STAMP_FUNCTION {
            return Err(ConfigError::Invalid(format!(
                "custom stamp function id '{}' collides with a builtin",
                id
            )));
        }
        Ok(Self { id, func })
    }

    pub fn id(&self) -> &'static str {
        self.id
    }
}

impl fmt::Debug for CustomStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStamp").field("id", &self.id).finish()
    }
}

/// A named, reproducible stamp function
#[derive(Debug, Clone, Copy)]
pub enum StampFunction {
    /// SHA-256 over the canonical leaf encoding
    Sha256,
    /// BLAKE3 over the canonical leaf encoding
    Blake3,
    Custom(CustomStamp),
}

impl StampFunction {
    pub fn id(&self) -> &'static str {
        match self {
            StampFunction::Sha256 => DEFAULT_STAMP_FUNCTION,
            StampFunction::Blake3 => BLAKE3_STAMP_FUNCTION,
            StampFunction::Custom(custom) => custom.id,
        }
    }

    /// Stamp a leaf
    pub fn stamp(&self, leaf: &Leaf) -> Hash {
        match self {
            StampFunction::Sha256 => sha256(&leaf.canonical_bytes()),
            StampFunction::Blake3 => Hash::new(*blake3::hash(&leaf.canonical_bytes()).as_bytes()),
            StampFunction::Custom(custom) => (custom.func)(leaf),
        }
    }
}

impl Default for StampFunction {
    fn default() -> Self {
        StampFunction::Sha256
    }
}

impl PartialEq for StampFunction {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for StampFunction {}

/// Resolves stamp function ids
///
/// Builtins are always present, plus at most one custom function.
#[derive(Debug, Clone, Default)]
pub struct StampRegistry {
    custom: Option<CustomStamp>,
}

impl StampRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_custom(custom: CustomStamp) -> Self {
        Self {
            custom: Some(custom),
        }
    }

    /// Look up a function by id
    pub fn resolve(&self, id: &str) -> Result<StampFunction, ConfigError> {
        match id {
            DEFAULT_STAMP_FUNCTION => Ok(StampFunction::Sha256),
            BLAKE3_STAMP_FUNCTION => Ok(StampFunction::Blake3),
            other => match self.custom {
                Some(custom) if custom.id == other => Ok(StampFunction::Custom(custom)),
                _ => Err(ConfigError::UnknownStampFunction(other.to_string())),
            },
        }
    }
}

mod salt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(salt: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match salt {
            Some(bytes) => serializer.serialize_str(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
