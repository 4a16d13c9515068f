//! Batch availability oracle
//!
//! Probes every file of a batch concurrently, stamps the ones that answered
//! and commits to them under a single timestamped Merkle root. One inclusion
//! proof per included file is then streamed to a [`ProofSink`] in leaf order.
//!
//! ```text
//! Idle -> Probing -> Aggregating -> Done
//!   \________\____________\_______-> Failed
//! ```
//!
//! Probes run as independent tasks bounded by a semaphore. Each writes its
//! outcome into the slot of its input index, so leaf order is the input
//! order no matter which probe finishes first. Aggregation only starts once
//! every slot is settled.

use async_trait::async_trait;
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeTarget;
use crate::client::StorageClient;
use crate::config::{ConfigError, OracleConfig};
use crate::hash::{cid_string, Hash};
use crate::merkle::{MerkleProof, StampTree, TreeError};
use crate::probe::{probe_file, ProbeFailure, ProbeOutcome};
use crate::sink::{ProofSink, SinkError, VecSink};
use crate::stamp::{Leaf, StampRegistry};

/// Length of the random per-leaf salt
pub const SALT_LEN: usize = 16;

/// A file submitted for attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(with = "cid_string")]
    pub identifier: Cid,
    /// Reference to an outboard BAO tree for the file, if one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obao_reference: Option<String>,
}

impl FileDescriptor {
    pub fn new(identifier: Cid) -> Self {
        Self {
            identifier,
            obao_reference: None,
        }
    }

    pub fn with_obao(identifier: Cid, obao_reference: impl Into<String>) -> Self {
        Self {
            identifier,
            obao_reference: Some(obao_reference.into()),
        }
    }
}

/// Root of a batch, bound to its timestamp and stamp function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedRoot {
    pub root: Hash,
    pub timestamp: u64,
    pub stamp_function: String,
}

impl TimestampedRoot {
    pub fn new(root: Hash, timestamp: u64, stamp_function: impl Into<String>) -> Self {
        Self {
            root,
            timestamp,
            stamp_function: stamp_function.into(),
        }
    }
}

impl fmt::Display for TimestampedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.root, self.timestamp, self.stamp_function)
    }
}

/// A file left out of the batch and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedFile {
    pub index: usize,
    #[serde(with = "cid_string")]
    pub identifier: Cid,
    pub reason: ProbeFailure,
}

/// Summary of a finished batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub root: TimestampedRoot,
    /// Input indices of included files, in leaf order
    pub included: Vec<usize>,
    pub excluded: Vec<ExcludedFile>,
}

impl BatchReport {
    pub fn leaf_count(&self) -> usize {
        self.included.len()
    }
}

/// Opaque verified-streaming proof attached to a file proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofFragment {
    pub obao_reference: String,
    #[serde(with = "fragment_hex")]
    pub bytes: Vec<u8>,
}

/// Everything a verifier needs for one included file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProof {
    #[serde(with = "cid_string")]
    pub identifier: Cid,
    pub leaf: Leaf,
    pub proof: MerkleProof,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<ProofFragment>,
}

/// Produces outboard BAO proof fragments for challenged content
#[async_trait]
pub trait ObaoProver: Send + Sync {
    async fn obao_proof(
        &self,
        target: &ChallengeTarget,
        obao_reference: &str,
    ) -> Result<ProofFragment, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Probing,
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Probing => "probing",
            BatchState::Aggregating => "aggregating",
            BatchState::Done => "done",
            BatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Done | BatchState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StateChanged(BatchState),
    ProbeFinished {
        index: usize,
        available: bool,
        elapsed: Duration,
    },
    RootComputed {
        root: Hash,
        leaves: usize,
    },
    ProofEmitted {
        index: usize,
    },
}

/// Receives batch progress; every method defaults to a no-op
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// What to do when no file in a batch was available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyBatchPolicy {
    /// Publish the empty-tree sentinel root with no proofs
    #[default]
    AllowEmptyRoot,
    /// Fail the batch
    RequireLeaves,
}

/// What to do when the batch deadline passes with probes outstanding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BatchTimeoutPolicy {
    /// Fail the batch
    #[default]
    Fail,
    /// Exclude outstanding files and commit to what resolved in time
    Partial,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("No file in the batch was available")]
    NoLeaves,

    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Batch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Probe task failed: {0}")]
    Task(String),

    #[error("Proof sink failed after root {root} was computed: {source}")]
    Sink {
        root: TimestampedRoot,
        #[source]
        source: SinkError,
    },
}

/// Included file waiting for its proof
struct Survivor {
    index: usize,
    leaf: Leaf,
    target: Option<ChallengeTarget>,
}

/// Orchestrates probing, aggregation and proof emission for batches
pub struct BatchOracle {
    client: Arc<dyn StorageClient>,
    config: OracleConfig,
    registry: StampRegistry,
    observer: Arc<dyn ProgressObserver>,
    obao_prover: Option<Arc<dyn ObaoProver>>,
}

/// State of a single `run` call, reported to the observer on every change
struct BatchRun<'a> {
    observer: &'a dyn ProgressObserver,
    state: BatchState,
}

impl<'a> BatchRun<'a> {
    fn start(observer: &'a dyn ProgressObserver) -> Self {
        let run = Self {
            observer,
            state: BatchState::Idle,
        };
        observer.on_event(&ProgressEvent::StateChanged(BatchState::Idle));
        run
    }

    fn transition(&mut self, next: BatchState) {
        if self.state.is_terminal() {
            debug!(state = %self.state, next = %next, "Ignoring transition out of terminal state");
            return;
        }
        self.state = next;
        debug!(state = %next, "Batch state changed");
        self.observer.on_event(&ProgressEvent::StateChanged(next));
    }

    fn fail(&mut self, error: BatchError) -> BatchError {
        warn!(error = %error, "Batch failed");
        self.transition(BatchState::Failed);
        error
    }
}

impl BatchOracle {
    pub fn new(client: Arc<dyn StorageClient>, config: OracleConfig) -> Self {
        Self {
            client,
            config,
            registry: StampRegistry::new(),
            observer: Arc::new(NoopObserver),
            obao_prover: None,
        }
    }

    pub fn with_registry(mut self, registry: StampRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_obao_prover(mut self, prover: Arc<dyn ObaoProver>) -> Self {
        self.obao_prover = Some(prover);
        self
    }

    /// Run one batch, streaming proofs to `sink`
    ///
    /// `epoch` seeds challenge selection and `timestamp` is bound into every
    /// leaf; both are chosen by the caller so runs are reproducible.
    /// Batches are independent, so one oracle may run several concurrently.
    /// The batch stays `Aggregating` until every proof reached the sink and
    /// only then becomes `Done`.
    pub async fn run(
        &self,
        descriptors: &[FileDescriptor],
        epoch: u64,
        timestamp: u64,
        sink: &mut dyn ProofSink,
    ) -> Result<BatchReport, BatchError> {
        let mut batch = BatchRun::start(self.observer.as_ref());
        let stamp_function = match self.config.validate(&self.registry) {
            Ok(function) => function,
            Err(e) => return Err(batch.fail(e.into())),
        };

        let start = Instant::now();
        info!(
            files = descriptors.len(),
            epoch,
            timestamp,
            stamp_function = stamp_function.id(),
            "Starting batch"
        );

        batch.transition(BatchState::Probing);
        let outcomes = match self.probe_all(descriptors, epoch).await {
            Ok(outcomes) => outcomes,
            Err(e) => return Err(batch.fail(e)),
        };

        batch.transition(BatchState::Aggregating);
        let mut survivors = Vec::new();
        let mut excluded = Vec::new();
        for (index, (descriptor, outcome)) in descriptors.iter().zip(outcomes).enumerate() {
            match outcome.result {
                Ok(()) => {
                    let leaf = if self.config.salt_leaves {
                        Leaf::with_salt(descriptor.identifier, timestamp, random_salt())
                    } else {
                        Leaf::new(descriptor.identifier, timestamp)
                    };
                    survivors.push(Survivor {
                        index,
                        leaf,
                        target: outcome.target,
                    });
                }
                Err(reason) => excluded.push(ExcludedFile {
                    index,
                    identifier: descriptor.identifier,
                    reason,
                }),
            }
        }

        if survivors.is_empty() && self.config.empty_batch_policy == EmptyBatchPolicy::RequireLeaves {
            return Err(batch.fail(AggregationError::NoLeaves.into()));
        }

        let stamps = survivors
            .iter()
            .map(|s| stamp_function.stamp(&s.leaf))
            .collect();
        let tree = StampTree::build(stamps);
        let root = TimestampedRoot::new(tree.root(), timestamp, stamp_function.id());
        self.observer.on_event(&ProgressEvent::RootComputed {
            root: root.root,
            leaves: tree.leaf_count(),
        });

        let report = BatchReport {
            root: root.clone(),
            included: survivors.iter().map(|s| s.index).collect(),
            excluded,
        };

        info!(
            root = %root.root,
            included = report.included.len(),
            excluded = report.excluded.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Computed batch root"
        );

        for (leaf_index, survivor) in survivors.into_iter().enumerate() {
            let proof = match tree.proof(leaf_index) {
                Ok(proof) => proof,
                Err(e) => return Err(batch.fail(AggregationError::from(e).into())),
            };
            let descriptor = &descriptors[survivor.index];
            let fragment = self.fragment_for(descriptor, survivor.target.as_ref()).await;

            let file_proof = FileProof {
                identifier: descriptor.identifier,
                leaf: survivor.leaf,
                proof,
                fragment,
            };
            if let Err(source) = sink.emit(file_proof) {
                return Err(batch.fail(BatchError::Sink {
                    root: root.clone(),
                    source,
                }));
            }
            self.observer
                .on_event(&ProgressEvent::ProofEmitted { index: survivor.index });
        }

        batch.transition(BatchState::Done);
        Ok(report)
    }

    /// Run one batch and collect its proofs in memory
    pub async fn run_collect(
        &self,
        descriptors: &[FileDescriptor],
        epoch: u64,
        timestamp: u64,
    ) -> Result<(BatchReport, Vec<FileProof>), BatchError> {
        let mut sink = VecSink::new();
        let report = self.run(descriptors, epoch, timestamp, &mut sink).await?;
        Ok((report, sink.into_proofs()))
    }

    async fn probe_all(
        &self,
        descriptors: &[FileDescriptor],
        epoch: u64,
    ) -> Result<Vec<ProbeOutcome>, BatchError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_probes));
        let timeout = self.config.probe_timeout();
        let mut tasks = JoinSet::new();

        for (index, descriptor) in descriptors.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let identifier = descriptor.identifier;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, ProbeOutcome::cancelled()),
                };
                let outcome = probe_file(client.as_ref(), &identifier, epoch, timeout).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ProbeOutcome>> = (0..descriptors.len()).map(|_| None).collect();

        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                let (index, outcome) = joined.map_err(|e| BatchError::Task(e.to_string()))?;
                self.observer.on_event(&ProgressEvent::ProbeFinished {
                    index,
                    available: outcome.is_available(),
                    elapsed: outcome.elapsed,
                });
                slots[index] = Some(outcome);
            }
            Ok::<(), BatchError>(())
        };

        let collected = match self.config.batch_timeout() {
            Some(limit) => tokio::time::timeout(limit, collect).await.map_err(|_| limit),
            None => Ok(collect.await),
        };

        match collected {
            Ok(result) => result?,
            Err(limit) => {
                tasks.abort_all();
                match self.config.batch_timeout_policy {
                    BatchTimeoutPolicy::Fail => return Err(BatchError::Timeout(limit)),
                    BatchTimeoutPolicy::Partial => {
                        let outstanding = slots.iter().filter(|s| s.is_none()).count();
                        warn!(
                            outstanding,
                            limit_ms = limit.as_millis() as u64,
                            "Batch deadline passed, excluding outstanding probes"
                        );
                    }
                }
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(ProbeOutcome::cancelled))
            .collect())
    }

    async fn fragment_for(
        &self,
        descriptor: &FileDescriptor,
        target: Option<&ChallengeTarget>,
    ) -> Option<ProofFragment> {
        let prover = self.obao_prover.as_ref()?;
        let reference = descriptor.obao_reference.as_deref()?;
        let target = target?;

        let limit = self.config.probe_timeout();
        match tokio::time::timeout(limit, prover.obao_proof(target, reference)).await {
            Ok(Ok(fragment)) => Some(fragment),
            Ok(Err(e)) => {
                warn!(cid = %descriptor.identifier, error = %e, "Obao proof failed, omitting fragment");
                None
            }
            Err(_) => {
                warn!(
                    cid = %descriptor.identifier,
                    limit_ms = limit.as_millis() as u64,
                    "Obao proof timed out, omitting fragment"
                );
                None
            }
        }
    }
}

fn random_salt() -> Vec<u8> {
    rand::random::<[u8; SALT_LEN]>().to_vec()
}

mod fragment_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
