//! RocksDB-backed local block storage
//!
//! Provides CID-indexed block storage with hash verification on write and a
//! file record format that lists a file's chunks in order. A file's
//! identifier is the CID of its record block.

use cid::Cid;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::hash::{block_cid, parse_cid_str, verify_block, HashError, FILE_RECORD_CODEC, RAW_CODEC};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("CID verification failed: {0}")]
    VerificationFailed(#[from] HashError),

    #[error("Invalid file record: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A block with its CID and data
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub cid: Cid,
    pub data: Vec<u8>,
}

impl Block {
    /// Create a raw data block, computing its CID
    pub fn new(data: Vec<u8>) -> Result<Self, HashError> {
        let cid = block_cid(&data, RAW_CODEC)?;
        Ok(Self { cid, data })
    }
}

/// Ordered chunk list of a file
///
/// Encoded as one chunk CID string per line. The record block uses
/// [`FILE_RECORD_CODEC`] so it can be told apart from raw chunk data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub chunks: Vec<Cid>,
}

impl FileRecord {
    pub fn new(chunks: Vec<Cid>) -> Self {
        Self { chunks }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = String::new();
        for cid in &self.chunks {
            buf.push_str(&cid.to_string());
            buf.push('\n');
        }
        buf.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| StorageError::InvalidRecord(format!("not utf-8: {}", e)))?;

        let chunks = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                parse_cid_str(line).map_err(|e| StorageError::InvalidRecord(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { chunks })
    }

    /// Turn the record into a storable block
    pub fn to_block(&self) -> Result<Block, HashError> {
        let data = self.encode();
        let cid = block_cid(&data, FILE_RECORD_CODEC)?;
        Ok(Block { cid, data })
    }
}

/// RocksDB-backed persistent block storage with CID-based indexing
pub struct BlockStore {
    db: Arc<DB>,
}

impl BlockStore {
    /// Open (or create) a block store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Point lookups dominate: CID -> block
        opts.optimize_for_point_lookup(64);
        opts.set_compression_type(rocksdb::DBCompressionType::None);
        opts.increase_parallelism(num_cpus::get() as i32);

        let db = DB::open(&opts, path.as_ref())?;

        info!("Opened RocksDB block store at {:?}", path.as_ref());
        Ok(Self { db: Arc::new(db) })
    }

    /// Store a block, verifying its CID
    pub async fn put(&self, block: Block) -> Result<(), StorageError> {
        verify_block(&block.data, &block.cid)?;

        let db = Arc::clone(&self.db);
        let key = block.cid.to_bytes();
        let size = block.data.len();
        let cid = block.cid;

        tokio::task::spawn_blocking(move || {
            if db.get_pinned(&key)?.is_some() {
                debug!(cid = %cid, "Block already exists");
                return Ok::<(), StorageError>(());
            }
            db.put(&key, &block.data)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::IoError(std::io::Error::other(e.to_string())))??;

        debug!(cid = %cid, size, "Stored block");
        Ok(())
    }

    /// Store raw data, returning its CID
    pub async fn put_data(&self, data: Vec<u8>) -> Result<Cid, StorageError> {
        let block = Block::new(data)?;
        let cid = block.cid;
        self.put(block).await?;
        Ok(cid)
    }

    /// Store a file record, returning the file identifier
    pub async fn put_record(&self, record: &FileRecord) -> Result<Cid, StorageError> {
        let block = record.to_block()?;
        let cid = block.cid;
        self.put(block).await?;
        Ok(cid)
    }

    /// Retrieve a block by CID
    pub async fn get(&self, cid: &Cid) -> Result<Block, StorageError> {
        let db = Arc::clone(&self.db);
        let key = cid.to_bytes();

        let data = tokio::task::spawn_blocking(move || db.get(&key))
            .await
            .map_err(|e| StorageError::IoError(std::io::Error::other(e.to_string())))??
            .ok_or_else(|| StorageError::BlockNotFound(cid.to_string()))?;

        Ok(Block { cid: *cid, data })
    }

    /// Delete a block
    pub async fn delete(&self, cid: &Cid) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let key = cid.to_bytes();
        let cid_str = cid.to_string();

        tokio::task::spawn_blocking(move || {
            if db.get_pinned(&key)?.is_none() {
                return Err(StorageError::BlockNotFound(cid_str));
            }
            db.delete(&key)?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::IoError(std::io::Error::other(e.to_string())))??;

        info!(cid = %cid, "Deleted block");
        Ok(())
    }

    /// List the chunks of a file
    ///
    /// Raw blocks have no sub-chunks and yield an empty list.
    pub async fn list_chunks(&self, cid: &Cid) -> Result<Vec<Cid>, StorageError> {
        let block = self.get(cid).await?;
        if cid.codec() != FILE_RECORD_CODEC {
            return Ok(Vec::new());
        }
        Ok(FileRecord::decode(&block.data)?.chunks)
    }
}
