//! Storage network collaborator
//!
//! The oracle only needs two things from a storage network: the ordered
//! chunk list of a file, and the bytes of one chunk within a deadline.
//! Errors from here are transport-level; the challenge and probe layers
//! fold them into per-file probe failures.

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::trace;

use crate::storage::{Block, BlockStore, FileRecord, StorageError};

/// Raw failure reported by a storage client
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Other(String),
}

impl From<StorageError> for TransportError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BlockNotFound(cid) => TransportError::NotFound(cid),
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// Read access to a content-addressed storage network
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Ordered chunk references of a file; empty for single-block content
    async fn list_chunks(&self, identifier: &Cid) -> Result<Vec<Cid>, TransportError>;

    /// Bytes of one chunk (or of a single-block file)
    async fn read_chunk(&self, reference: &Cid, timeout: Duration) -> Result<Bytes, TransportError>;
}

/// [`StorageClient`] over a local [`BlockStore`]
pub struct LocalStoreClient {
    store: Arc<BlockStore>,
}

impl LocalStoreClient {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StorageClient for LocalStoreClient {
    async fn list_chunks(&self, identifier: &Cid) -> Result<Vec<Cid>, TransportError> {
        Ok(self.store.list_chunks(identifier).await?)
    }

    async fn read_chunk(&self, reference: &Cid, timeout: Duration) -> Result<Bytes, TransportError> {
        let block = tokio::time::timeout(timeout, self.store.get(reference))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        Ok(Bytes::from(block.data))
    }
}

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<Cid, Bytes>,
    records: HashMap<Cid, Vec<Cid>>,
    unreachable: HashSet<Cid>,
    delays: HashMap<Cid, Duration>,
}

/// In-memory storage network for tests and demos
///
/// Individual CIDs can be made unreachable or slow to exercise the probe's
/// failure paths without a real network.
#[derive(Clone, Default)]
pub struct MemoryStoreClient {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-block file, returning its CID
    pub async fn add_block(&self, data: Vec<u8>) -> Result<Cid, StorageError> {
        let block = Block::new(data)?;
        let cid = block.cid;
        self.state
            .write()
            .await
            .blocks
            .insert(cid, Bytes::from(block.data));
        Ok(cid)
    }

    /// Add a chunked file, returning the CID of its record
    pub async fn add_file(&self, chunks: Vec<Vec<u8>>) -> Result<Cid, StorageError> {
        let mut chunk_cids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            chunk_cids.push(self.add_block(chunk).await?);
        }

        let record = FileRecord::new(chunk_cids.clone());
        let block = record.to_block()?;
        let cid = block.cid;

        let mut state = self.state.write().await;
        state.blocks.insert(cid, Bytes::from(block.data));
        state.records.insert(cid, chunk_cids);
        Ok(cid)
    }

    /// Make every read and listing of `cid` fail with `NotFound`
    pub async fn set_unreachable(&self, cid: Cid) {
        self.state.write().await.unreachable.insert(cid);
    }

    /// Delay every read of `cid`
    pub async fn set_delay(&self, cid: Cid, delay: Duration) {
        self.state.write().await.delays.insert(cid, delay);
    }

    /// Chunks of a file record, bypassing reachability
    pub async fn chunks_of(&self, identifier: &Cid) -> Vec<Cid> {
        self.state
            .read()
            .await
            .records
            .get(identifier)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageClient for MemoryStoreClient {
    async fn list_chunks(&self, identifier: &Cid) -> Result<Vec<Cid>, TransportError> {
        let state = self.state.read().await;
        if state.unreachable.contains(identifier) {
            return Err(TransportError::NotFound(identifier.to_string()));
        }
        if let Some(chunks) = state.records.get(identifier) {
            return Ok(chunks.clone());
        }
        if state.blocks.contains_key(identifier) {
            return Ok(Vec::new());
        }
        Err(TransportError::NotFound(identifier.to_string()))
    }

    async fn read_chunk(&self, reference: &Cid, timeout: Duration) -> Result<Bytes, TransportError> {
        let (data, delay) = {
            let state = self.state.read().await;
            if state.unreachable.contains(reference) {
                return Err(TransportError::NotFound(reference.to_string()));
            }
            let data = state
                .blocks
                .get(reference)
                .cloned()
                .ok_or_else(|| TransportError::NotFound(reference.to_string()))?;
            (data, state.delays.get(reference).copied())
        };

        if let Some(delay) = delay {
            trace!(cid = %reference, delay_ms = delay.as_millis() as u64, "Delaying read");
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(TransportError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_client_files_and_blocks() {
        let client = MemoryStoreClient::new();
        let single = client.add_block(b"single".to_vec()).await.unwrap();
        let file = client
            .add_file(vec![b"c0".to_vec(), b"c1".to_vec(), b"c2".to_vec()])
            .await
            .unwrap();

        assert!(client.list_chunks(&single).await.unwrap().is_empty());

        let chunks = client.list_chunks(&file).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks, client.chunks_of(&file).await);

        let data = client
            .read_chunk(&chunks[1], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&data[..], b"c1");
    }

    #[tokio::test]
    async fn test_memory_client_unreachable() {
        let client = MemoryStoreClient::new();
        let cid = client.add_block(b"gone".to_vec()).await.unwrap();
        client.set_unreachable(cid).await;

        assert!(matches!(
            client.list_chunks(&cid).await,
            Err(TransportError::NotFound(_))
        ));
        assert!(matches!(
            client.read_chunk(&cid, Duration::from_secs(1)).await,
            Err(TransportError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_client_delay_beyond_timeout() {
        let client = MemoryStoreClient::new();
        let cid = client.add_block(b"slow".to_vec()).await.unwrap();
        client.set_delay(cid, Duration::from_secs(10)).await;

        let result = client.read_chunk(&cid, Duration::from_millis(100)).await;
        assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(100))));

        let ok = client.read_chunk(&cid, Duration::from_secs(20)).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_local_store_client() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BlockStore::open(dir.path()).unwrap());
        let a = store.put_data(b"chunk a".to_vec()).await.unwrap();
        let file = store.put_record(&FileRecord::new(vec![a])).await.unwrap();
        let client = LocalStoreClient::new(store);

        assert_eq!(client.list_chunks(&file).await.unwrap(), vec![a]);
        let data = client.read_chunk(&a, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&data[..], b"chunk a");

        let missing = Block::new(b"missing".to_vec()).unwrap().cid;
        assert!(matches!(
            client.read_chunk(&missing, Duration::from_secs(1)).await,
            Err(TransportError::NotFound(_))
        ));
    }
}
