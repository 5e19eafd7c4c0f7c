//! Connector capability consumed by the producer.
//!
//! The producer never speaks the wire protocol itself. Everything it needs
//! from the cluster goes through the [`Connector`] trait:
//!
//! - topic metadata (the partition ids of a topic)
//! - the current leader broker of a partition
//! - writing a produce request to a broker
//! - reading the broker's response to that request
//!
//! Encoding, compression codecs and connection management live behind the
//! implementation. [`crate::memory::InMemoryCluster`] is an in-process
//! implementation used by tests and the bundled example.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{CompressionType, RequiredAcks};
use crate::error::Result;

/// Identifier of a broker in the cluster.
pub type BrokerId = i32;

/// Identifier pairing a written request with its response.
pub type CorrelationId = i32;

/// A record as it travels on the wire: encoded key, encoded value, timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Optional encoded key
    pub key: Option<Bytes>,
    /// Encoded value
    pub value: Bytes,
    /// Timestamp in milliseconds since Unix epoch
    pub timestamp: u64,
}

/// A produce request for one sealed batch.
///
/// Built once per batch and reused verbatim for every retry.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    /// Client identifier for broker-side logging and quotas
    pub client_id: String,
    /// Destination topic
    pub topic: String,
    /// Destination partition
    pub partition: u32,
    /// Acknowledgment level requested from the broker
    pub acks: RequiredAcks,
    /// Broker-side acknowledgment timeout
    pub timeout_ms: u32,
    /// Compression the connector should apply when encoding
    pub compression: CompressionType,
    /// Records in enqueue order
    pub records: Vec<EncodedRecord>,
}

/// Broker response to an acknowledged produce request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceResponse {
    /// Offset assigned to the first record of the batch
    pub base_offset: u64,
}

/// Narrow view of the cluster used by the producer pipeline.
///
/// Implementations must be safe to call concurrently: the metadata cache,
/// and up to `max_in_flight_requests` dispatcher request tasks, call into the
/// same connector at once.
///
/// Errors should be mapped onto [`crate::ClientError`] so the dispatcher can
/// classify them: transport failures as `NetworkError`, leadership changes as
/// `NotLeaderForPartition` / `LeaderNotAvailable`, and permanent rejections as
/// `BrokerError`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Fetch the partition ids of `topic`.
    async fn fetch_partitions(&self, topic: &str) -> Result<Vec<u32>>;

    /// Resolve the broker currently leading `topic`/`partition`.
    async fn leader(&self, topic: &str, partition: u32) -> Result<BrokerId>;

    /// Write a produce request to `broker`.
    ///
    /// Returns once the request is written. With [`RequiredAcks::None`] the
    /// producer treats a successful write as delivery.
    async fn send_produce_request(
        &self,
        broker: BrokerId,
        request: &ProduceRequest,
    ) -> Result<CorrelationId>;

    /// Read the response to a previously written request.
    async fn read_produce_response(
        &self,
        broker: BrokerId,
        correlation_id: CorrelationId,
    ) -> Result<ProduceResponse>;
}
