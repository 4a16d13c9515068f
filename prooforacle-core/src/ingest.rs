//! File ingestion into the local block store
//!
//! Splits a byte stream into fixed-size chunks, stores each chunk as a raw
//! block and finishes with a file record listing them in order. The record's
//! CID is the file identifier the oracle challenges.

use cid::Cid;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::storage::{BlockStore, FileRecord, StorageError};

/// Default chunk size: 64KB
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Chunk size must be greater than 0")]
    ZeroChunkSize,

    #[error("Input is empty")]
    EmptyInput,
}

/// Reads an async source as fixed-size chunks
pub struct Chunker<R> {
    reader: R,
    chunk_size: usize,
    eof_reached: bool,
}

impl<R: AsyncRead + Unpin> Chunker<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::ZeroChunkSize);
        }
        Ok(Self {
            reader,
            chunk_size,
            eof_reached: false,
        })
    }

    /// Next chunk; the last one may be short, `None` after EOF
    pub async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.eof_reached {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.chunk_size];
        let mut total_read = 0;

        while total_read < self.chunk_size {
            match self.reader.read(&mut buffer[total_read..]).await? {
                0 => {
                    self.eof_reached = true;
                    if total_read == 0 {
                        return Ok(None);
                    }
                    buffer.truncate(total_read);
                    return Ok(Some(buffer));
                }
                n => total_read += n,
            }
        }

        Ok(Some(buffer))
    }
}

/// Result of ingesting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub identifier: Cid,
    pub chunks: usize,
    pub bytes: u64,
}

/// Chunk `reader` into `store` and return the file identifier
pub async fn ingest_reader<R: AsyncRead + Unpin>(
    store: &BlockStore,
    reader: R,
    chunk_size: usize,
) -> Result<IngestSummary, IngestError> {
    let mut chunker = Chunker::new(reader, chunk_size)?;
    let mut chunks = Vec::new();
    let mut bytes = 0u64;

    while let Some(chunk) = chunker.next_chunk().await? {
        bytes += chunk.len() as u64;
        let cid = store.put_data(chunk).await?;
        debug!(index = chunks.len(), cid = %cid, "Stored chunk");
        chunks.push(cid);
    }

    if chunks.is_empty() {
        return Err(IngestError::EmptyInput);
    }

    let count = chunks.len();
    let identifier = store.put_record(&FileRecord::new(chunks)).await?;
    info!(cid = %identifier, chunks = count, bytes, "Ingested file");

    Ok(IngestSummary {
        identifier,
        chunks: count,
        bytes,
    })
}

/// Ingest a file from disk
pub async fn ingest_file(
    store: &BlockStore,
    path: &Path,
    chunk_size: usize,
) -> Result<IngestSummary, IngestError> {
    let file = tokio::fs::File::open(path).await?;
    ingest_reader(store, file, chunk_size).await
}
