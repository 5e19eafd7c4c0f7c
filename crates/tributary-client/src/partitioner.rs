//! Partition selection.
//!
//! A [`Partitioner`] maps a record key and a topic's partition list to one
//! partition id from that list. Two strategies ship with the crate:
//!
//! 1. **Hash (default)**: SipHash of the key modulo the partition count, so
//!    the same key always lands on the same partition while the partition
//!    count is unchanged. Keyless records rotate across partitions.
//!
//! 2. **Round-robin**: every record goes to the next partition, keys ignored.
//!
//! Custom strategies implement the trait and are installed with
//! [`ProducerBuilder::partitioner`](crate::ProducerBuilder::partitioner).

use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{ClientError, Result};

/// Chooses the partition of a record.
///
/// Implementations are called concurrently from every `send` and must return
/// a member of `partitions`. `partitions` is sorted and never empty when
/// called by the producer; implementations still reject an empty list with
/// `NoPartitions`.
pub trait Partitioner: Send + Sync {
    fn partition(&self, topic: &str, key: Option<&[u8]>, partitions: &[u32]) -> Result<u32>;
}

/// Built-in strategy selector, usable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionerKind {
    #[default]
    Hash,
    RoundRobin,
}

impl PartitionerKind {
    pub fn build(self) -> Arc<dyn Partitioner> {
        match self {
            PartitionerKind::Hash => Arc::new(HashPartitioner::new()),
            PartitionerKind::RoundRobin => Arc::new(RoundRobinPartitioner::new()),
        }
    }
}

/// Key hashing with round-robin fallback for keyless records.
#[derive(Debug, Default)]
pub struct HashPartitioner {
    keyless: AtomicUsize,
}

impl HashPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// SipHash-2-4 (zero keys) of the raw key bytes.
    ///
    /// Stable across processes, releases and target platforms: no length
    /// prefix or other native-width data is fed to the hasher.
    pub fn hash_key(key: &[u8]) -> u64 {
        let mut hasher = siphasher::sip::SipHasher::new();
        hasher.write(key);
        hasher.finish()
    }
}

impl Partitioner for HashPartitioner {
    fn partition(&self, topic: &str, key: Option<&[u8]>, partitions: &[u32]) -> Result<u32> {
        if partitions.is_empty() {
            return Err(ClientError::NoPartitions(topic.to_string()));
        }
        let index = match key {
            Some(k) => (Self::hash_key(k) % partitions.len() as u64) as usize,
            None => self.keyless.fetch_add(1, Ordering::Relaxed) % partitions.len(),
        };
        Ok(partitions[index])
    }
}

/// Cycles through partitions regardless of key.
#[derive(Debug, Default)]
pub struct RoundRobinPartitioner {
    next: AtomicUsize,
}

impl RoundRobinPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Partitioner for RoundRobinPartitioner {
    fn partition(&self, topic: &str, _key: Option<&[u8]>, partitions: &[u32]) -> Result<u32> {
        if partitions.is_empty() {
            return Err(ClientError::NoPartitions(topic.to_string()));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % partitions.len();
        Ok(partitions[index])
    }
}
