//! Error types for Tributary producer operations.
//!
//! Errors are categorized by where they arise in the delivery pipeline so the
//! network dispatcher can decide whether a failed batch is worth retrying.
//!
//! ## Error Handling Strategy
//!
//! - **Input errors**: `SerializationError`, `NoPartitions`
//! - **Metadata errors**: `TopicNotFound`, `MetadataError`
//! - **Retriable errors**: `NetworkError`, `Timeout`, `NotLeaderForPartition`, `LeaderNotAvailable`
//! - **Terminal errors**: `BrokerError`
//! - **Admission errors**: `BufferFull`, `ProducerClosed`
//! - **Fatal errors**: `ConfigError`, `Internal`
//!
//! ## Examples
//!
//! ```ignore
//! use tributary_client::{ClientError, ProducerRecord};
//!
//! match producer.send(ProducerRecord::new("orders", payload)).await.await {
//!     Ok(meta) => println!("stored at {}/{:?}", meta.partition, meta.offset),
//!     Err(failed) => match failed.error {
//!         ClientError::TopicNotFound(topic) => eprintln!("no topic {}", topic),
//!         ClientError::BufferFull => eprintln!("producer saturated, back off"),
//!         other => eprintln!("delivery failed: {}", other),
//!     },
//! }
//! ```

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use crate::connector::BrokerId;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for every stage of the producer pipeline.
///
/// `ClientError` is `Clone` because a terminal failure of a sealed batch is
/// reported to every record in that batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A key or value serializer rejected its input.
    ///
    /// Reported on the record's own delivery future before the record enters
    /// the pipeline. Never retried.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The cluster reported that the topic does not exist.
    #[error("Topic '{0}' does not exist")]
    TopicNotFound(String),

    /// The cluster returned an empty partition list for the topic.
    ///
    /// Usually means the topic is still being created. The empty list is not
    /// cached, so the next send refetches.
    #[error("No partitions known for topic '{0}'")]
    NoPartitions(String),

    /// The connector could not fetch metadata for a topic.
    #[error("Metadata fetch for topic '{0}' failed: {1}")]
    MetadataError(String, String),

    /// Transport failure while talking to a broker.
    ///
    /// ## Causes
    /// - Broker restarting or unreachable
    /// - Connection reset mid-request
    ///
    /// ## Resolution
    /// - The dispatcher retries automatically up to `retries` times
    #[error("Network error talking to broker {0}: {1}")]
    NetworkError(BrokerId, String),

    /// A write or a response read exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The broker no longer leads the partition.
    ///
    /// Marks the topic stale in the metadata cache and is retried.
    #[error("Broker {0} is not the leader for {1}/{2}")]
    NotLeaderForPartition(BrokerId, String, u32),

    /// The partition currently has no leader (election in progress).
    #[error("No leader available for {0}/{1}")]
    LeaderNotAvailable(String, u32),

    /// The broker rejected the request for a reason retrying will not fix.
    ///
    /// ## Causes
    /// - Record too large
    /// - Authorization failure
    /// - Corrupt request
    #[error("Broker {0} rejected request: {1}")]
    BrokerError(BrokerId, String),

    /// The inbound queue is saturated and `block_on_buffer_full` is off.
    #[error("Producer buffer is full")]
    BufferFull,

    /// `send` was called after `close`.
    #[error("Producer is closed")]
    ProducerClosed,

    /// Invalid producer configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error that shouldn't normally occur.
    ///
    /// Also produced when a pipeline task disappears while still owning a
    /// record.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether a failed produce attempt may succeed if sent again.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use tributary_client::ClientError;
    ///
    /// assert!(ClientError::Timeout(Duration::from_secs(5)).is_retryable());
    /// assert!(!ClientError::BrokerError(1, "record too large".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::NetworkError(..)
                | ClientError::Timeout(_)
                | ClientError::NotLeaderForPartition(..)
                | ClientError::LeaderNotAvailable(..)
        )
    }

    /// Whether the error means cached partition metadata can no longer be trusted.
    pub fn is_stale_metadata(&self) -> bool {
        matches!(
            self,
            ClientError::NotLeaderForPartition(..) | ClientError::LeaderNotAvailable(..)
        )
    }
}

/// A record that could not be delivered, together with the reason.
///
/// `partition` is `None` when the failure happened before a partition was
/// assigned. `key` and `value` carry the encoded record when serialization
/// got that far.
#[derive(Debug, Clone, Error)]
#[error("delivery to topic '{topic}' failed: {error}")]
pub struct DeliveryError {
    /// Topic the record was addressed to.
    pub topic: String,
    /// Partition the record was assigned to, if any.
    pub partition: Option<u32>,
    /// Encoded key, if the key was serialized.
    pub key: Option<Bytes>,
    /// Encoded value, if the value was serialized.
    pub value: Option<Bytes>,
    /// Why delivery failed.
    #[source]
    pub error: ClientError,
}

impl DeliveryError {
    pub(crate) fn before_encoding(topic: impl Into<String>, error: ClientError) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: None,
            error,
        }
    }
}
