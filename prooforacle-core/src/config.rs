//! Configuration management for prooforacle
//!
//! Handles CLI argument parsing, config file loading, and defaults.

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ingest::DEFAULT_CHUNK_SIZE;
use crate::oracle::{BatchTimeoutPolicy, EmptyBatchPolicy};
use crate::stamp::{StampFunction, StampRegistry, DEFAULT_STAMP_FUNCTION};

/// Per-file challenge timeout when none is configured
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown stamp function: {0}")]
    UnknownStampFunction(String),
}

#[derive(Parser, Debug)]
#[command(name = "prooforacle")]
#[command(about = "Batch file-availability oracle with timestamped Merkle proofs", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk files into the local block store
    Ingest(IngestCommand),
    /// Probe a batch of files and publish a timestamped root with proofs
    Attest(AttestCommand),
    /// Check proofs against a published root
    Verify(VerifyCommand),
}

#[derive(Args, Debug, Clone)]
pub struct IngestCommand {
    /// Data directory of the block store
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Files to ingest
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AttestCommand {
    /// Data directory of the block store
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// TOML file with oracle settings; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// File identifiers to attest, in leaf order
    #[arg(required = true)]
    pub cids: Vec<String>,

    /// Challenge epoch (defaults to the timestamp)
    #[arg(long)]
    pub epoch: Option<u64>,

    /// Batch timestamp in unix milliseconds (defaults to now)
    #[arg(long)]
    pub timestamp: Option<u64>,

    #[arg(long)]
    pub stamp_function: Option<String>,

    #[arg(long)]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long)]
    pub max_concurrent_probes: Option<usize>,

    #[arg(long)]
    pub batch_timeout_ms: Option<u64>,

    #[arg(long, value_enum)]
    pub empty_batch_policy: Option<EmptyBatchPolicy>,

    #[arg(long, value_enum)]
    pub batch_timeout_policy: Option<BatchTimeoutPolicy>,

    /// Add a random salt to every leaf
    #[arg(long)]
    pub salt_leaves: bool,

    /// Where to write the batch report (stdout if omitted)
    #[arg(long)]
    pub root_out: Option<PathBuf>,

    /// Where to write the JSON-lines proofs
    #[arg(long, default_value = "./proofs.jsonl")]
    pub proofs_out: PathBuf,

    /// Where to write Prometheus-format batch metrics
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyCommand {
    /// Batch report written by `attest`
    #[arg(long)]
    pub root: PathBuf,

    /// JSON-lines proofs written by `attest`
    #[arg(long)]
    pub proofs: PathBuf,

    /// Only check the proof for this identifier
    #[arg(long)]
    pub cid: Option<String>,
}

/// Oracle settings, fixed per deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub stamp_function: String,
    pub probe_timeout_ms: u64,
    pub max_concurrent_probes: usize,
    pub batch_timeout_ms: Option<u64>,
    pub empty_batch_policy: EmptyBatchPolicy,
    pub batch_timeout_policy: BatchTimeoutPolicy,
    pub salt_leaves: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            stamp_function: DEFAULT_STAMP_FUNCTION.to_string(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_concurrent_probes: num_cpus::get() * 4,
            batch_timeout_ms: None,
            empty_batch_policy: EmptyBatchPolicy::default(),
            batch_timeout_policy: BatchTimeoutPolicy::default(),
            salt_leaves: false,
        }
    }
}

impl OracleConfig {
    /// Load config from a TOML file; missing keys take their defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: OracleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }

    /// Check bounds and resolve the configured stamp function
    pub fn validate(&self, registry: &StampRegistry) -> Result<StampFunction, ConfigError> {
        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.batch_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "batch_timeout_ms must be greater than 0".to_string(),
            ));
        }
        registry.resolve(&self.stamp_function)
    }
}

impl AttestCommand {
    /// Build the oracle config: file (or defaults) first, then flag overrides
    pub fn oracle_config(&self) -> Result<OracleConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => OracleConfig::load_from_file(path)?,
            None => OracleConfig::default(),
        };

        if let Some(id) = &self.stamp_function {
            config.stamp_function = id.clone();
        }
        if let Some(ms) = self.probe_timeout_ms {
            config.probe_timeout_ms = ms;
        }
        if let Some(n) = self.max_concurrent_probes {
            config.max_concurrent_probes = n;
        }
        if let Some(ms) = self.batch_timeout_ms {
            config.batch_timeout_ms = Some(ms);
        }
        if let Some(policy) = self.empty_batch_policy {
            config.empty_batch_policy = policy;
        }
        if let Some(policy) = self.batch_timeout_policy {
            config.batch_timeout_policy = policy;
        }
        if self.salt_leaves {
            config.salt_leaves = true;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn attest(args: &[&str]) -> AttestCommand {
        match parse(args).command {
            Commands::Attest(cmd) => cmd,
            other => panic!("Expected attest, got {:?}", other),
        }
    }

    #[test]
    fn test_default_config() {
        let config = OracleConfig::default();
        assert_eq!(config.stamp_function, "default-sha256");
        assert_eq!(config.probe_timeout(), Duration::from_millis(1000));
        assert_eq!(config.max_concurrent_probes, num_cpus::get() * 4);
        assert_eq!(config.batch_timeout(), None);
        assert_eq!(config.empty_batch_policy, EmptyBatchPolicy::AllowEmptyRoot);
        assert_eq!(config.batch_timeout_policy, BatchTimeoutPolicy::Fail);
        assert!(!config.salt_leaves);
        assert!(config.validate(&StampRegistry::new()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let registry = StampRegistry::new();

        let config = OracleConfig {
            max_concurrent_probes: 0,
            ..OracleConfig::default()
        };
        assert!(matches!(config.validate(&registry), Err(ConfigError::Invalid(_))));

        let config = OracleConfig {
            probe_timeout_ms: 0,
            ..OracleConfig::default()
        };
        assert!(matches!(config.validate(&registry), Err(ConfigError::Invalid(_))));

        let config = OracleConfig {
            batch_timeout_ms: Some(0),
            ..OracleConfig::default()
        };
        assert!(matches!(config.validate(&registry), Err(ConfigError::Invalid(_))));

        let config = OracleConfig {
            stamp_function: "md5".to_string(),
            ..OracleConfig::default()
        };
        assert!(matches!(
            config.validate(&registry),
            Err(ConfigError::UnknownStampFunction(id)) if id == "md5"
        ));

        let config = OracleConfig {
            stamp_function: "blake3".to_string(),
            ..OracleConfig::default()
        };
        assert_eq!(config.validate(&registry).unwrap(), StampFunction::Blake3);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
stamp_function = "blake3"
batch_timeout_ms = 30000
empty_batch_policy = "require-leaves"
batch_timeout_policy = "partial"
"#
        )
        .unwrap();

        let config = OracleConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.stamp_function, "blake3");
        assert_eq!(config.batch_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.empty_batch_policy, EmptyBatchPolicy::RequireLeaves);
        assert_eq!(config.batch_timeout_policy, BatchTimeoutPolicy::Partial);
        assert_eq!(config.probe_timeout_ms, DEFAULT_PROBE_TIMEOUT_MS);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "probe_timeout_ms = \"soon\"").unwrap();
        assert!(matches!(
            OracleConfig::load_from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));

        assert!(matches!(
            OracleConfig::load_from_file(Path::new("/nonexistent/oracle.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "stamp_function = \"blake3\"\nprobe_timeout_ms = 250").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cmd = attest(&[
            "prooforacle",
            "attest",
            "--config",
            path.as_str(),
            "--probe-timeout-ms",
            "5000",
            "--batch-timeout-policy",
            "partial",
            "--salt-leaves",
            "bafkreiexample",
        ]);
        let config = cmd.oracle_config().unwrap();

        assert_eq!(config.stamp_function, "blake3");
        assert_eq!(config.probe_timeout_ms, 5000);
        assert_eq!(config.batch_timeout_policy, BatchTimeoutPolicy::Partial);
        assert!(config.salt_leaves);
        assert_eq!(cmd.cids, vec!["bafkreiexample".to_string()]);
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = parse(&["prooforacle", "--log-level", "debug", "ingest", "a.bin", "b.bin"]);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Ingest(cmd) => {
                assert_eq!(cmd.files.len(), 2);
                assert_eq!(cmd.chunk_size, DEFAULT_CHUNK_SIZE);
                assert_eq!(cmd.data_dir, PathBuf::from("./data"));
            }
            other => panic!("Expected ingest, got {:?}", other),
        }

        let cli = parse(&["prooforacle", "verify", "--root", "r.json", "--proofs", "p.jsonl"]);
        assert!(matches!(cli.command, Commands::Verify(VerifyCommand { cid: None, .. })));

        assert!(Cli::try_parse_from(["prooforacle", "attest"]).is_err());
    }
}
