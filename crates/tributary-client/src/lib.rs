//! Tributary Client - asynchronous batching producer
//!
//! This crate publishes records to a partitioned, append-only log cluster
//! (Kafka-style). It handles serialization, partition routing, topic metadata
//! caching, per-partition batching, bounded in-flight requests and retries.
//! The cluster itself is reached through the [`Connector`] trait.
//!
//! # Examples
//!
//! ## Producer
//!
//! ```ignore
//! use std::sync::Arc;
//! use tributary_client::{InMemoryCluster, Producer, ProducerRecord, StringSerializer};
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.create_topic("orders", 3);
//!
//! let producer = Producer::<String, String>::builder()
//!     .connector(cluster)
//!     .key_serializer(StringSerializer)
//!     .value_serializer(StringSerializer)
//!     .build()
//!     .await?;
//!
//! let delivery = producer
//!     .send(ProducerRecord::new("orders", "order data".to_string()).with_key("user123".to_string()))
//!     .await;
//! println!("Stored: {:?}", delivery.await?);
//!
//! producer.close().await?;
//! ```

mod accumulator;
mod network;
mod router;
mod stats;

pub mod batch;
pub mod config;
pub mod connector;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod partitioner;
pub mod producer;
pub mod record;
pub mod retry;
pub mod serializer;

pub use batch::BatchLimits;
pub use config::{CompressionType, ProducerConfig, RequiredAcks};
pub use connector::{
    BrokerId, Connector, CorrelationId, EncodedRecord, ProduceRequest, ProduceResponse,
};
pub use error::{ClientError, DeliveryError, Result};
pub use memory::InMemoryCluster;
pub use metadata::MetadataCache;
pub use partitioner::{HashPartitioner, Partitioner, PartitionerKind, RoundRobinPartitioner};
pub use producer::{Producer, ProducerBuilder};
pub use record::{DeliveryFuture, DeliveryResult, ProducerRecord, RecordMetadata};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use serializer::{BytesSerializer, JsonSerializer, Serializer, StringSerializer};
pub use stats::ProducerStatsSnapshot;
