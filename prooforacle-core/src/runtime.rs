//! Command execution for the prooforacle binary
//!
//! Wires the block store, oracle, sinks and verifier together for each CLI
//! subcommand. Results go to stdout or the requested files; logs go through
//! tracing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::LocalStoreClient;
use crate::config::{AttestCommand, Cli, Commands, ConfigError, IngestCommand, VerifyCommand};
use crate::hash::{parse_cid_str, HashError};
use crate::ingest::{ingest_file, IngestError, IngestSummary};
use crate::metrics::{BatchMetrics, FanoutObserver, TracingObserver};
use crate::oracle::{BatchError, BatchOracle, BatchReport, FileDescriptor};
use crate::sink::{read_json_lines, JsonLinesSink, SinkError};
use crate::stamp::StampRegistry;
use crate::storage::{BlockStore, StorageError};
use crate::verify::verify_with_registry;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Invalid CID: {0}")]
    InvalidCid(#[from] HashError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No proof for {0}")]
    NoMatchingProof(String),

    #[error("{failed} of {checked} proofs failed verification")]
    VerificationFailed { failed: usize, checked: usize },
}

/// Outcome of checking a proofs file against a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    pub checked: usize,
    pub failed: usize,
}

/// Run the parsed command line
pub async fn run(cli: Cli) -> Result<(), RuntimeError> {
    match cli.command {
        Commands::Ingest(cmd) => {
            for summary in run_ingest(&cmd).await? {
                println!("{}", summary.identifier);
            }
        }
        Commands::Attest(cmd) => {
            run_attest(&cmd).await?;
        }
        Commands::Verify(cmd) => {
            run_verify(&cmd)?;
        }
    }
    Ok(())
}

pub async fn run_ingest(cmd: &IngestCommand) -> Result<Vec<IngestSummary>, RuntimeError> {
    let store = BlockStore::open(&cmd.data_dir)?;
    let mut summaries = Vec::with_capacity(cmd.files.len());

    for path in &cmd.files {
        let summary = ingest_file(&store, path, cmd.chunk_size).await?;
        info!(path = %path.display(), cid = %summary.identifier, chunks = summary.chunks, "Ingested");
        summaries.push(summary);
    }

    Ok(summaries)
}

pub async fn run_attest(cmd: &AttestCommand) -> Result<BatchReport, RuntimeError> {
    let config = cmd.oracle_config()?;
    let registry = StampRegistry::new();
    config.validate(&registry)?;
    let descriptors = cmd
        .cids
        .iter()
        .map(|s| parse_cid_str(s).map(FileDescriptor::new))
        .collect::<Result<Vec<_>, _>>()?;

    let timestamp = cmd.timestamp.unwrap_or_else(now_millis);
    let epoch = cmd.epoch.unwrap_or(timestamp);

    let store = Arc::new(BlockStore::open(&cmd.data_dir)?);
    let metrics = BatchMetrics::new();
    let observer = FanoutObserver::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(metrics.clone()));
    let oracle = BatchOracle::new(Arc::new(LocalStoreClient::new(store)), config)
        .with_registry(registry)
        .with_observer(Arc::new(observer));

    let mut sink = JsonLinesSink::new(BufWriter::new(File::create(&cmd.proofs_out)?));
    let report = oracle.run(&descriptors, epoch, timestamp, &mut sink).await?;
    let written = sink.written();
    sink.finish()?;

    let json = serde_json::to_string_pretty(&report)?;
    match &cmd.root_out {
        Some(path) => std::fs::write(path, json + "\n")?,
        None => println!("{}", json),
    }

    if let Some(path) = &cmd.metrics_out {
        std::fs::write(path, metrics.to_prometheus())?;
    }

    info!(
        root = %report.root.root,
        proofs = written,
        proofs_out = %cmd.proofs_out.display(),
        "Attestation complete"
    );
    Ok(report)
}

pub fn run_verify(cmd: &VerifyCommand) -> Result<VerifySummary, RuntimeError> {
    let report: BatchReport = serde_json::from_str(&std::fs::read_to_string(&cmd.root)?)?;
    let proofs = read_json_lines(&std::fs::read_to_string(&cmd.proofs)?)?;
    let only = cmd.cid.as_deref().map(parse_cid_str).transpose()?;

    let registry = StampRegistry::new();
    let leaf_count = report.leaf_count();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut checked = 0;
    let mut failed = 0;

    for proof in proofs
        .iter()
        .filter(|p| only.map_or(true, |cid| p.identifier == cid))
    {
        checked += 1;
        let ok = proof.leaf.identifier == proof.identifier
            && proof.proof.leaf_count == leaf_count
            && verify_with_registry(&proof.leaf, &proof.proof, &report.root, &registry);
        if ok {
            writeln!(out, "OK   {}", proof.identifier)?;
        } else {
            failed += 1;
            warn!(cid = %proof.identifier, "Proof failed verification");
            writeln!(out, "FAIL {}", proof.identifier)?;
        }
    }

    if let (Some(cid), 0) = (only, checked) {
        return Err(RuntimeError::NoMatchingProof(cid.to_string()));
    }
    if failed > 0 {
        return Err(RuntimeError::VerificationFailed { failed, checked });
    }

    Ok(VerifySummary { checked, failed })
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
