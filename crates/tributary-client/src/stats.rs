//! Producer counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ProducerStats {
    records_sent: AtomicU64,
    records_rejected: AtomicU64,
    records_delivered: AtomicU64,
    records_failed: AtomicU64,
    batches_sent: AtomicU64,
    retries: AtomicU64,
}

impl ProducerStats {
    pub fn record_sent(&self) {
        self.records_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_delivered(&self, records: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn batch_failed(&self, records: usize) {
        self.records_failed
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Producer statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStatsSnapshot {
    /// Records accepted into the pipeline
    pub records_sent: u64,
    /// Records failed before entering the pipeline (serialization, metadata, full buffer)
    pub records_rejected: u64,
    /// Records acknowledged by the cluster
    pub records_delivered: u64,
    /// Accepted records that failed delivery
    pub records_failed: u64,
    /// Produce requests that succeeded
    pub batches_sent: u64,
    /// Produce attempts beyond the first
    pub retries: u64,
}

impl ProducerStatsSnapshot {
    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.records_sent == 0 {
            1.0
        } else {
            self.records_delivered as f64 / self.records_sent as f64
        }
    }

    /// Accepted records still awaiting an outcome
    pub fn pending(&self) -> u64 {
        self.records_sent
            .saturating_sub(self.records_delivered + self.records_failed)
    }
}
