//! Read-only metrics surface for dashboards (§4.10/§6/C16): cumulative
//! counters updated by workers via atomics, snapshotted on demand.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::worker::WorkerActivity;

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub calls_tested: u64,
    pub sequences_tested: u64,
    pub failed_sequences: u64,
    pub gas_used: u64,
    pub workers_active: u64,
    pub workers_shrinking: u64,
    pub branches_hit: u64,
    pub corpus_size: usize,
    pub worker_activity: Vec<WorkerActivity>,
}

#[derive(Default)]
pub struct Metrics {
    calls_tested: AtomicU64,
    sequences_tested: AtomicU64,
    failed_sequences: AtomicU64,
    gas_used: AtomicU64,
    workers_active: AtomicU64,
    workers_shrinking: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, gas_used: u64) {
        self.calls_tested.fetch_add(1, Ordering::Relaxed);
        self.gas_used.fetch_add(gas_used, Ordering::Relaxed);
    }

    pub fn record_sequence(&self, failed: bool) {
        self.sequences_tested.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_sequences.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn worker_became_active(&self) {
        self.workers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_became_idle(&self) {
        self.workers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn worker_entered_shrinking(&self) {
        self.workers_shrinking.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_left_shrinking(&self) {
        self.workers_shrinking.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn sequences_tested(&self) -> u64 {
        self.sequences_tested.load(Ordering::Relaxed)
    }

    pub fn failed_sequences(&self) -> u64 {
        self.failed_sequences.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, branches_hit: u64, corpus_size: usize, worker_activity: Vec<WorkerActivity>) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_tested: self.calls_tested.load(Ordering::Relaxed),
            sequences_tested: self.sequences_tested.load(Ordering::Relaxed),
            failed_sequences: self.failed_sequences.load(Ordering::Relaxed),
            gas_used: self.gas_used.load(Ordering::Relaxed),
            workers_active: self.workers_active.load(Ordering::Relaxed),
            workers_shrinking: self.workers_shrinking.load(Ordering::Relaxed),
            branches_hit,
            corpus_size,
            worker_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_call(100);
        metrics.record_call(50);
        metrics.record_sequence(true);
        let snap = metrics.snapshot(0, 0, Vec::new());
        assert_eq!(snap.calls_tested, 2);
        assert_eq!(snap.gas_used, 150);
        assert_eq!(snap.failed_sequences, 1);
    }
}
