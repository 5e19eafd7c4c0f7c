//! Records and their delivery outcomes.
//!
//! A caller builds a [`ProducerRecord`], hands it to
//! [`Producer::send`](crate::Producer::send) and receives a
//! [`DeliveryFuture`]. The future resolves exactly once, to either
//! [`RecordMetadata`] (the record is stored) or a
//! [`DeliveryError`](crate::DeliveryError).
//!
//! ## Lifecycle
//!
//! ```text
//! ProducerRecord<K, V> ──serialize + partition──► PendingRecord ──batch──► broker
//!        │                                              │
//!        └──────────── DeliveryFuture ◄──── oneshot ────┘
//! ```
//!
//! The oneshot channel has a single slot, so completing a record never waits
//! on the caller. Dropping a `DeliveryFuture` is allowed and does not stall
//! the pipeline.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

use crate::connector::EncodedRecord;
use crate::error::{ClientError, DeliveryError};

/// Outcome of sending one record.
pub type DeliveryResult = std::result::Result<RecordMetadata, DeliveryError>;

/// A record to be sent to a topic.
///
/// The partition is chosen by the producer's partitioner from the record
/// key; records without a key are spread across partitions.
///
/// # Examples
///
/// ```
/// use tributary_client::ProducerRecord;
///
/// let keyed = ProducerRecord::new("orders", "order data".to_string())
///     .with_key("user123".to_string());
/// assert_eq!(keyed.topic, "orders");
/// assert!(keyed.key.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ProducerRecord<K, V> {
    /// Destination topic
    pub topic: String,
    /// Optional key; drives partition selection
    pub key: Option<K>,
    /// Record payload
    pub value: V,
}

impl<K, V> ProducerRecord<K, V> {
    /// A keyless record.
    pub fn new(topic: impl Into<String>, value: V) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value,
        }
    }

    /// Attach a key.
    pub fn with_key(mut self, key: K) -> Self {
        self.key = Some(key);
        self
    }
}

/// Where a record was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic the record was written to.
    pub topic: String,

    /// Partition the record was written to.
    pub partition: u32,

    /// Offset assigned to the record within the partition.
    ///
    /// `None` when the producer runs with `RequiredAcks::None`: the broker
    /// does not answer, so no offset is known.
    pub offset: Option<u64>,

    /// Record timestamp in milliseconds since Unix epoch.
    pub timestamp: u64,

    /// Encoded key as sent.
    pub key: Option<Bytes>,

    /// Encoded value as sent.
    pub value: Bytes,
}

/// Future resolving to the delivery outcome of one record.
///
/// If the pipeline loses the record without completing it (a pipeline task
/// panicked), the future resolves to an `Internal` error rather than hanging.
#[derive(Debug)]
pub struct DeliveryFuture {
    topic: String,
    receiver: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryFuture {
    pub(crate) fn new(topic: String, receiver: oneshot::Receiver<DeliveryResult>) -> Self {
        Self { topic, receiver }
    }

    /// Topic this delivery belongs to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Future for DeliveryFuture {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(DeliveryError::before_encoding(
                    this.topic.clone(),
                    ClientError::Internal("delivery abandoned by producer pipeline".to_string()),
                ))
            })
        })
    }
}

/// A serialized, partitioned record travelling through the pipeline.
///
/// Owned by exactly one pipeline stage at a time; completing it consumes it,
/// so a record can never be completed twice.
#[derive(Debug)]
pub(crate) struct PendingRecord {
    pub topic: String,
    pub partition: u32,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: u64,
    delivery: oneshot::Sender<DeliveryResult>,
}

impl PendingRecord {
    pub fn new(
        topic: String,
        partition: u32,
        key: Option<Bytes>,
        value: Bytes,
        delivery: oneshot::Sender<DeliveryResult>,
    ) -> Self {
        Self {
            topic,
            partition,
            key,
            value,
            timestamp: now_millis(),
            delivery,
        }
    }

    /// Encoded size used for batch limits.
    ///
    /// key + value + 16 bytes of per-record overhead (timestamp and framing).
    pub fn size_bytes(&self) -> usize {
        let key_size = self.key.as_ref().map_or(0, |k| k.len());
        key_size + self.value.len() + 16
    }

    pub fn encoded(&self) -> EncodedRecord {
        EncodedRecord {
            key: self.key.clone(),
            value: self.value.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn complete(self, offset: Option<u64>) {
        let metadata = RecordMetadata {
            topic: self.topic,
            partition: self.partition,
            offset,
            timestamp: self.timestamp,
            key: self.key,
            value: self.value,
        };
        // Receiver may have been dropped; nothing to do then.
        let _ = self.delivery.send(Ok(metadata));
    }

    pub fn fail(self, error: ClientError) {
        let failure = DeliveryError {
            topic: self.topic,
            partition: Some(self.partition),
            key: self.key,
            value: Some(self.value),
            error,
        };
        let _ = self.delivery.send(Err(failure));
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn pending(
    topic: &str,
    partition: u32,
    value: &'static str,
) -> (PendingRecord, DeliveryFuture) {
    let (tx, rx) = oneshot::channel();
    let record = PendingRecord::new(
        topic.to_string(),
        partition,
        None,
        Bytes::from_static(value.as_bytes()),
        tx,
    );
    (record, DeliveryFuture::new(topic.to_string(), rx))
}
