//! Deterministic challenge selection
//!
//! Picks which chunk of a file the availability probe has to fetch. The
//! index is derived from the file identifier and a caller-supplied epoch,
//! never from wall-clock time, so a prover and a verifier computing the
//! challenge at different moments agree on it.
//!
//! ```text
//! digest = SHA256("prooforacle/challenge/v1" || 0x00 || cid_bytes || u64_le(epoch))
//! index  = u64_le(digest[0..8]) mod chunk_count
//! ```

use cid::Cid;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tracing::trace;

use crate::client::{StorageClient, TransportError};

const CHALLENGE_DOMAIN: &[u8] = b"prooforacle/challenge/v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("No challengeable chunks for {0}")]
    NoChunks(Cid),

    #[error("Failed to list chunks: {0}")]
    Transport(#[from] TransportError),
}

/// What the availability probe has to retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeTarget {
    /// One chunk of a multi-chunk file
    Chunk { index: usize, reference: Cid },
    /// The file itself, for content without sub-chunks
    WholeContent(Cid),
}

impl ChallengeTarget {
    /// The CID the probe has to read
    pub fn reference(&self) -> &Cid {
        match self {
            ChallengeTarget::Chunk { reference, .. } => reference,
            ChallengeTarget::WholeContent(cid) => cid,
        }
    }
}

impl fmt::Display for ChallengeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeTarget::Chunk { index, reference } => {
                write!(f, "chunk {} ({})", index, reference)
            }
            ChallengeTarget::WholeContent(cid) => write!(f, "whole content ({})", cid),
        }
    }
}

/// Derive the challenged chunk index for a file in an epoch
///
/// Pure: identical inputs always give the same index. `chunk_count` must be
/// non-zero.
pub fn challenge_index(identifier: &Cid, epoch: u64, chunk_count: usize) -> usize {
    debug_assert!(chunk_count > 0, "chunk_count must be greater than 0");

    let mut hasher = Sha256::new();
    hasher.update(CHALLENGE_DOMAIN);
    hasher.update([0x00]);
    hasher.update(identifier.to_bytes());
    hasher.update(epoch.to_le_bytes());
    let digest = hasher.finalize();

    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(word) % chunk_count.max(1) as u64) as usize
}

/// Select the challenge target from an already fetched chunk listing
///
/// References equal to the file identifier itself are not real sub-chunks
/// and are filtered out before indexing.
pub fn select_from_chunks(
    identifier: &Cid,
    epoch: u64,
    chunks: &[Cid],
) -> Result<ChallengeTarget, ChallengeError> {
    if chunks.is_empty() {
        return Ok(ChallengeTarget::WholeContent(*identifier));
    }

    let candidates: Vec<&Cid> = chunks.iter().filter(|c| *c != identifier).collect();
    if candidates.is_empty() {
        return Err(ChallengeError::NoChunks(*identifier));
    }

    let index = challenge_index(identifier, epoch, candidates.len());
    Ok(ChallengeTarget::Chunk {
        index,
        reference: *candidates[index],
    })
}

/// Select the challenge target for a file, listing its chunks first
pub async fn select_challenge(
    client: &dyn StorageClient,
    identifier: &Cid,
    epoch: u64,
) -> Result<ChallengeTarget, ChallengeError> {
    let chunks = client.list_chunks(identifier).await?;
    let target = select_from_chunks(identifier, epoch, &chunks)?;
    trace!(cid = %identifier, epoch, chunks = chunks.len(), target = %target, "Selected challenge");
    Ok(target)
}
