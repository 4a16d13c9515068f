//! Prooforacle Core
//!
//! Batch file-availability oracle: challenge selection, availability probes,
//! leaf stamping, Merkle aggregation and inclusion-proof verification, plus
//! the RocksDB block store and ingest path used by the command line tool.

pub mod challenge;
pub mod client;
pub mod config;
pub mod hash;
pub mod ingest;
pub mod merkle;
pub mod metrics;
pub mod oracle;
pub mod probe;
pub mod runtime;
pub mod sink;
pub mod stamp;
pub mod storage;
pub mod verify;

pub use challenge::{challenge_index, select_challenge, select_from_chunks, ChallengeError, ChallengeTarget};
pub use client::{LocalStoreClient, MemoryStoreClient, StorageClient, TransportError};
pub use config::{Cli, Commands, ConfigError, OracleConfig};
pub use hash::{block_cid, sha256, Hash, HashError, FILE_RECORD_CODEC, RAW_CODEC};
pub use ingest::{ingest_file, ingest_reader, IngestError, IngestSummary, DEFAULT_CHUNK_SIZE};
pub use merkle::{empty_root, MerkleProof, ProofStep, Side, StampTree, TreeError};
pub use metrics::{BatchMetrics, FanoutObserver, TracingObserver};
pub use oracle::{
    AggregationError, BatchError, BatchOracle, BatchReport, BatchState, BatchTimeoutPolicy,
    EmptyBatchPolicy, ExcludedFile, FileDescriptor, FileProof, NoopObserver, ObaoProver,
    ProgressEvent, ProgressObserver, ProofFragment, TimestampedRoot,
};
pub use probe::{is_available, probe_file, probe_target, ProbeFailure, ProbeOutcome};
pub use runtime::{run, RuntimeError};
pub use sink::{FnSink, JsonLinesSink, ProofSink, SinkError, VecSink};
pub use stamp::{CustomStamp, Leaf, StampFunction, StampRegistry, DEFAULT_STAMP_FUNCTION};
pub use storage::{Block, BlockStore, FileRecord, StorageError};
pub use verify::{verify, verify_with_registry, InvalidProof};

// Re-export Cid for external use
pub use cid::Cid;
