//! Batch metrics and progress logging
//!
//! Thread-safe counters fed by the oracle's progress events, rendered in
//! Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::oracle::{ProgressEvent, ProgressObserver};

/// Counters for one oracle process, shared across batches
#[derive(Clone, Default)]
pub struct BatchMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    batches_completed: AtomicU64,
    batches_failed: AtomicU64,

    probes_succeeded: AtomicU64,
    probes_failed: AtomicU64,
    total_probe_time_ms: AtomicU64,

    proofs_emitted: AtomicU64,
    last_leaf_count: AtomicU64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe_finished(&self, available: bool, duration_ms: u64) {
        if available {
            self.inner.probes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.probes_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .total_probe_time_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn probes_succeeded(&self) -> u64 {
        self.inner.probes_succeeded.load(Ordering::Relaxed)
    }

    pub fn probes_failed(&self) -> u64 {
        self.inner.probes_failed.load(Ordering::Relaxed)
    }

    pub fn probes_total(&self) -> u64 {
        self.probes_succeeded() + self.probes_failed()
    }

    pub fn avg_probe_time_ms(&self) -> f64 {
        let total = self.inner.total_probe_time_ms.load(Ordering::Relaxed);
        let count = self.probes_total();
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn proofs_emitted(&self) -> u64 {
        self.inner.proofs_emitted.load(Ordering::Relaxed)
    }

    pub fn batches_completed(&self) -> u64 {
        self.inner.batches_completed.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.inner.batches_failed.load(Ordering::Relaxed)
    }

    pub fn last_leaf_count(&self) -> u64 {
        self.inner.last_leaf_count.load(Ordering::Relaxed)
    }

    /// Generate Prometheus-formatted metrics text
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP prooforacle_batches_completed_total Batches that reached the done state\n\
             # TYPE prooforacle_batches_completed_total counter\n\
             prooforacle_batches_completed_total {}\n\
             \n\
             # HELP prooforacle_batches_failed_total Batches that failed\n\
             # TYPE prooforacle_batches_failed_total counter\n\
             prooforacle_batches_failed_total {}\n\
             \n\
             # HELP prooforacle_probes_succeeded_total Files found available\n\
             # TYPE prooforacle_probes_succeeded_total counter\n\
             prooforacle_probes_succeeded_total {}\n\
             \n\
             # HELP prooforacle_probes_failed_total Files found unavailable\n\
             # TYPE prooforacle_probes_failed_total counter\n\
             prooforacle_probes_failed_total {}\n\
             \n\
             # HELP prooforacle_proofs_emitted_total Inclusion proofs handed to the sink\n\
             # TYPE prooforacle_proofs_emitted_total counter\n\
             prooforacle_proofs_emitted_total {}\n\
             \n\
             # HELP prooforacle_last_batch_leaves Leaves in the most recent root\n\
             # TYPE prooforacle_last_batch_leaves gauge\n\
             prooforacle_last_batch_leaves {}\n\
             \n\
             # HELP prooforacle_avg_probe_time_ms Average probe time in milliseconds\n\
             # TYPE prooforacle_avg_probe_time_ms gauge\n\
             prooforacle_avg_probe_time_ms {:.2}\n",
            self.batches_completed(),
            self.batches_failed(),
            self.probes_succeeded(),
            self.probes_failed(),
            self.proofs_emitted(),
            self.last_leaf_count(),
            self.avg_probe_time_ms(),
        )
    }
}

impl ProgressObserver for BatchMetrics {
    fn on_event(&self, event: &ProgressEvent) {
        use crate::oracle::BatchState;

        match event {
            ProgressEvent::ProbeFinished {
                available, elapsed, ..
            } => self.probe_finished(*available, elapsed.as_millis() as u64),
            ProgressEvent::RootComputed { leaves, .. } => {
                self.inner
                    .last_leaf_count
                    .store(*leaves as u64, Ordering::Relaxed);
            }
            ProgressEvent::ProofEmitted { .. } => {
                self.inner.proofs_emitted.fetch_add(1, Ordering::Relaxed);
            }
            ProgressEvent::StateChanged(BatchState::Done) => {
                self.inner.batches_completed.fetch_add(1, Ordering::Relaxed);
            }
            ProgressEvent::StateChanged(BatchState::Failed) => {
                self.inner.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
            ProgressEvent::StateChanged(_) => {}
        }
    }
}

/// Logs every progress event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StateChanged(state) => info!(state = %state, "Batch state"),
            ProgressEvent::ProbeFinished {
                index,
                available,
                elapsed,
            } => debug!(
                index,
                available,
                duration_ms = elapsed.as_millis() as u64,
                "Probe finished"
            ),
            ProgressEvent::RootComputed { root, leaves } => {
                info!(root = %root, leaves, "Root computed")
            }
            ProgressEvent::ProofEmitted { index } => debug!(index, "Proof emitted"),
        }
    }
}

/// Forwards events to several observers in order
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ProgressObserver for FanoutObserver {
    fn on_event(&self, event: &ProgressEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
