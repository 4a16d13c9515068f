//! Availability probing
//!
//! Fetches a challenge target under a deadline and reports whether it came
//! back. A probe never returns an error to its caller: every failure mode
//! collapses to "unavailable" with a reason attached for the batch report.

use cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::challenge::{select_challenge, ChallengeError, ChallengeTarget};
use crate::client::{StorageClient, TransportError};

/// Why a file was excluded from a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    NotFound,
    Timeout,
    /// The target was readable but returned no data
    Empty,
    NoChunks,
    Transport(String),
    /// The batch deadline passed before the probe settled
    Cancelled,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::NotFound => f.write_str("not found"),
            ProbeFailure::Timeout => f.write_str("timed out"),
            ProbeFailure::Empty => f.write_str("empty response"),
            ProbeFailure::NoChunks => f.write_str("no challengeable chunks"),
            ProbeFailure::Transport(msg) => write!(f, "transport error: {}", msg),
            ProbeFailure::Cancelled => f.write_str("cancelled by batch deadline"),
        }
    }
}

impl From<TransportError> for ProbeFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(_) => ProbeFailure::NotFound,
            TransportError::Timeout(_) => ProbeFailure::Timeout,
            TransportError::Other(msg) => ProbeFailure::Transport(msg),
        }
    }
}

impl From<ChallengeError> for ProbeFailure {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::NoChunks(_) => ProbeFailure::NoChunks,
            ChallengeError::Transport(e) => e.into(),
        }
    }
}

/// Result of probing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// The selected target, if selection got that far
    pub target: Option<ChallengeTarget>,
    pub result: Result<(), ProbeFailure>,
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn is_available(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        self.result.as_ref().err()
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            target: None,
            result: Err(ProbeFailure::Cancelled),
            elapsed: Duration::ZERO,
        }
    }
}

/// Try to read the challenge target within `timeout`
///
/// The client receives the timeout too, but the bound is enforced here so a
/// client that ignores it cannot stall the probe.
pub async fn probe_target(
    client: &dyn StorageClient,
    target: &ChallengeTarget,
    timeout: Duration,
) -> Result<(), ProbeFailure> {
    let read = client.read_chunk(target.reference(), timeout);
    match tokio::time::timeout(timeout, read).await {
        Ok(Ok(data)) if data.is_empty() => Err(ProbeFailure::Empty),
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ProbeFailure::Timeout),
    }
}

/// Boolean form of [`probe_target`]
pub async fn is_available(
    client: &dyn StorageClient,
    target: &ChallengeTarget,
    timeout: Duration,
) -> bool {
    probe_target(client, target, timeout).await.is_ok()
}

/// Select a challenge for `identifier` and probe it
///
/// Chunk listing and chunk read share the same `timeout` budget.
pub async fn probe_file(
    client: &dyn StorageClient,
    identifier: &Cid,
    epoch: u64,
    timeout: Duration,
) -> ProbeOutcome {
    let start = Instant::now();

    let target = match tokio::time::timeout(timeout, select_challenge(client, identifier, epoch)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            let failure = ProbeFailure::from(e);
            warn!(cid = %identifier, reason = %failure, "Challenge selection failed");
            return ProbeOutcome {
                target: None,
                result: Err(failure),
                elapsed: start.elapsed(),
            };
        }
        Err(_) => {
            warn!(cid = %identifier, "Challenge selection timed out");
            return ProbeOutcome {
                target: None,
                result: Err(ProbeFailure::Timeout),
                elapsed: start.elapsed(),
            };
        }
    };

    let remaining = timeout.saturating_sub(start.elapsed());
    let result = probe_target(client, &target, remaining).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(()) => debug!(
            cid = %identifier,
            target = %target,
            duration_ms = elapsed.as_millis() as u64,
            "Probe succeeded"
        ),
        Err(reason) => warn!(
            cid = %identifier,
            target = %target,
            reason = %reason,
            "Probe failed"
        ),
    }

    ProbeOutcome {
        target: Some(target),
        result,
        elapsed,
    }
}
