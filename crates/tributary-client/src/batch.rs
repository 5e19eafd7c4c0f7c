//! Producer batches.
//!
//! A [`ProducerBatch`] groups records for a single (topic, partition) so one
//! produce request carries many records.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  ProducerBatch (OPEN)        │ owned by the partition's accumulator
//! │  - records: Vec<Pending>     │
//! │  - size_bytes: usize         │
//! │  - created_at: Instant       │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ Seal on size (batch_size records or max_batch_bytes)
//!        ├─→ Seal on time (linger)
//!        ├─→ Seal on close
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │  SEALED                      │ moved into the dispatcher queue
//! └──────┬───────────────────────┘
//!        ▼
//!   ProduceRequest ─→ broker ─→ complete / fail every record
//! ```
//!
//! Sealing is a move: once a batch is handed to the dispatcher the
//! accumulator no longer holds it and cannot append to it.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::ProducerConfig;
use crate::connector::ProduceRequest;
use crate::error::ClientError;
use crate::record::PendingRecord;

/// Size and time thresholds for sealing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum number of records per batch
    pub batch_size: usize,

    /// Maximum batch size in bytes
    pub max_batch_bytes: usize,

    /// Maximum time an open batch waits for more records
    pub linger: Duration,
}

impl BatchLimits {
    pub fn from_config(config: &ProducerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_batch_bytes: config.max_batch_bytes,
            linger: config.linger,
        }
    }
}

/// Ordered records bound for one partition.
#[derive(Debug)]
pub(crate) struct ProducerBatch {
    pub topic: String,
    pub partition: u32,
    records: Vec<PendingRecord>,
    size_bytes: usize,
    created_at: Instant,
}

impl ProducerBatch {
    /// Open a batch with its first record.
    pub fn open(record: PendingRecord) -> Self {
        let mut batch = Self {
            topic: record.topic.clone(),
            partition: record.partition,
            records: Vec::new(),
            size_bytes: 0,
            created_at: Instant::now(),
        };
        batch.push(record);
        batch
    }

    /// Whether `record` can join without breaking a limit.
    ///
    /// An empty batch accepts anything, so an oversized record still travels
    /// alone rather than being rejected.
    pub fn has_room_for(&self, record: &PendingRecord, limits: &BatchLimits) -> bool {
        if self.records.is_empty() {
            return true;
        }
        self.records.len() < limits.batch_size
            && self.size_bytes + record.size_bytes() <= limits.max_batch_bytes
    }

    /// Whether the batch should seal without waiting for another record.
    pub fn is_full(&self, limits: &BatchLimits) -> bool {
        self.records.len() >= limits.batch_size || self.size_bytes >= limits.max_batch_bytes
    }

    pub fn push(&mut self, record: PendingRecord) {
        self.size_bytes += record.size_bytes();
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Build the wire request. Reused unchanged for every retry.
    pub fn to_request(&self, config: &ProducerConfig) -> ProduceRequest {
        ProduceRequest {
            client_id: config.client_id.clone(),
            topic: self.topic.clone(),
            partition: self.partition,
            acks: config.required_acks,
            timeout_ms: config.ack_timeout_ms(),
            compression: config.compression,
            records: self.records.iter().map(PendingRecord::encoded).collect(),
        }
    }

    /// Resolve every record as delivered.
    ///
    /// With a base offset, record `i` receives `base + i`.
    pub fn complete(self, base_offset: Option<u64>) {
        for (i, record) in self.records.into_iter().enumerate() {
            record.complete(base_offset.map(|base| base + i as u64));
        }
    }

    /// Resolve every record with the same error.
    pub fn fail(self, error: ClientError) {
        for record in self.records {
            record.fail(error.clone());
        }
    }
}
