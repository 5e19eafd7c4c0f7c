//! Producer API for sending records to a partitioned log cluster.
//!
//! The [`Producer`] is the entry point of the crate. Each `send` serializes
//! the record, picks its partition and hands it to a pipeline of background
//! tasks that batch records per partition and ship the batches to the
//! partition leaders.
//!
//! ## Features
//!
//! - **Typed keys and values**: one [`Serializer`] per type, fixed at build time
//! - **Partition routing**: key hashing by default, pluggable [`Partitioner`]
//! - **Topic metadata caching**: partition lists cached with a TTL
//! - **Batching**: per-partition batches sealed on size or linger
//! - **Bounded memory**: every queue is bounded; `send` blocks or fails fast
//! - **Retries**: transient broker failures retried with a fixed backoff
//! - **Ordered delivery**: offsets within a partition follow `send` order
//!
//! ## Pipeline
//!
//! ```text
//! send() ──► inbound ──► router ──► topic task ──► accumulator (per TP)
//!                                                        │ sealed batch
//!                                                        ▼
//!           DeliveryFuture ◄── complete/fail ◄── network dispatcher ──► connector
//! ```
//!
//! ## Examples
//!
//! ### Basic Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tributary_client::{InMemoryCluster, Producer, ProducerRecord, StringSerializer};
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.create_topic("orders", 3);
//!
//! let producer = Producer::<String, String>::builder()
//!     .connector(cluster.clone())
//!     .key_serializer(StringSerializer)
//!     .value_serializer(StringSerializer)
//!     .build()
//!     .await?;
//!
//! let delivery = producer
//!     .send(ProducerRecord::new("orders", "order data".to_string()).with_key("user123".to_string()))
//!     .await;
//! let metadata = delivery.await?;
//! println!("Written to partition {} at offset {:?}", metadata.partition, metadata.offset);
//!
//! producer.close().await?;
//! ```
//!
//! ### Configuration
//!
//! ```ignore
//! let producer = Producer::<String, Vec<u8>>::builder()
//!     .config(ProducerConfig::from_file("producer.toml")?)
//!     .connector(connector)
//!     .value_serializer(BytesSerializer)
//!     .batch_size(500)                          // Records per batch
//!     .linger(Duration::from_millis(20))        // Max batch wait
//!     .retries(5)                               // Retry attempts
//!     .required_acks(RequiredAcks::All)
//!     .build()
//!     .await?;
//! ```

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::batch::BatchLimits;
use crate::config::{CompressionType, ProducerConfig, RequiredAcks};
use crate::connector::Connector;
use crate::error::{ClientError, DeliveryError, Result};
use crate::metadata::MetadataCache;
use crate::network::NetworkDispatcher;
use crate::partitioner::Partitioner;
use crate::record::{DeliveryFuture, DeliveryResult, PendingRecord, ProducerRecord};
use crate::router::spawn_router;
use crate::serializer::Serializer;
use crate::stats::{ProducerStats, ProducerStatsSnapshot};

struct PipelineTasks {
    router: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Asynchronous batching producer.
///
/// `Producer` is `Send + Sync`; share it behind an `Arc` to send from many
/// tasks. Dropping it without [`close`](Self::close) still flushes accepted
/// records in the background, but nothing waits for them.
pub struct Producer<K, V> {
    /// Validated configuration, shared with the pipeline.
    config: Arc<ProducerConfig>,

    /// Serializer for record keys; `None` rejects keyed records.
    key_serializer: Option<Arc<dyn Serializer<K>>>,

    /// Serializer for record values.
    value_serializer: Arc<dyn Serializer<V>>,

    partitioner: Arc<dyn Partitioner>,

    /// Topic partition lists with TTL.
    ///
    /// Shared with the network dispatcher, which marks topics stale on
    /// leadership errors.
    metadata: Arc<MetadataCache>,

    /// Inbound queue into the router. Taken by `close`; `None` afterwards.
    inbound: RwLock<Option<mpsc::Sender<PendingRecord>>>,

    /// Background tasks, awaited once by `close`.
    tasks: Mutex<Option<PipelineTasks>>,

    stats: Arc<ProducerStats>,
}

impl<K, V> Producer<K, V> {
    /// Create a new `ProducerBuilder` to configure and build a Producer.
    pub fn builder() -> ProducerBuilder<K, V> {
        ProducerBuilder::new()
    }

    /// Send a record.
    ///
    /// Serializes the key and value, resolves the topic's partitions, picks a
    /// partition and enqueues the record. The returned future resolves once
    /// the record's batch is acknowledged or has failed for good.
    ///
    /// Failures before enqueueing (serialization, metadata, partitioning, a
    /// full buffer, a closed producer) resolve the future immediately; the
    /// pipeline never sees the record.
    ///
    /// When the inbound queue is full this waits for room if
    /// `block_on_buffer_full` is set, and fails with `BufferFull` otherwise.
    pub async fn send(&self, record: ProducerRecord<K, V>) -> DeliveryFuture {
        let (delivery, receiver) = oneshot::channel();
        let future = DeliveryFuture::new(record.topic.clone(), receiver);

        match self.prepare(record).await {
            Ok((topic, partition, key, value)) => {
                let pending = PendingRecord::new(topic, partition, key, value, delivery);
                self.enqueue(pending).await;
            }
            Err(failure) => {
                debug!(topic = %failure.topic, error = %failure.error, "Record rejected");
                self.stats.record_rejected();
                let _ = delivery.send(Err(failure));
            }
        }
        future
    }

    /// Send a record and wait for its outcome.
    pub async fn send_and_wait(&self, record: ProducerRecord<K, V>) -> DeliveryResult {
        self.send(record).await.await
    }

    async fn prepare(
        &self,
        record: ProducerRecord<K, V>,
    ) -> std::result::Result<(String, u32, Option<Bytes>, Bytes), DeliveryError> {
        let ProducerRecord { topic, key, value } = record;

        let key = match key {
            None => None,
            Some(key) => {
                let encoded = match &self.key_serializer {
                    Some(serializer) => serializer.serialize(&key),
                    None => Err(ClientError::SerializationError(
                        "record has a key but no key serializer is configured".to_string(),
                    )),
                };
                match encoded {
                    Ok(bytes) => Some(bytes),
                    Err(e) => return Err(DeliveryError::before_encoding(topic, e)),
                }
            }
        };

        let value = match self.value_serializer.serialize(&value) {
            Ok(bytes) => bytes,
            Err(error) => {
                return Err(DeliveryError {
                    topic,
                    partition: None,
                    key,
                    value: None,
                    error,
                })
            }
        };

        let assigned = match self.metadata.get(&topic).await {
            Ok(partitions) => self
                .partitioner
                .partition(&topic, key.as_deref(), &partitions)
                .and_then(|partition| {
                    if partitions.binary_search(&partition).is_ok() {
                        Ok(partition)
                    } else {
                        Err(ClientError::Internal(format!(
                            "partitioner chose partition {} which topic '{}' does not have",
                            partition, topic
                        )))
                    }
                }),
            Err(e) => Err(e),
        };

        match assigned {
            Ok(partition) => Ok((topic, partition, key, value)),
            Err(error) => Err(DeliveryError {
                topic,
                partition: None,
                key,
                value: Some(value),
                error,
            }),
        }
    }

    async fn enqueue(&self, pending: PendingRecord) {
        let inbound = self.inbound.read().await;
        let Some(tx) = inbound.as_ref() else {
            self.stats.record_rejected();
            pending.fail(ClientError::ProducerClosed);
            return;
        };

        if self.config.block_on_buffer_full {
            match tx.send(pending).await {
                Ok(()) => self.stats.record_sent(),
                Err(mpsc::error::SendError(pending)) => {
                    self.stats.record_rejected();
                    pending.fail(ClientError::ProducerClosed);
                }
            }
        } else {
            match tx.try_send(pending) {
                Ok(()) => self.stats.record_sent(),
                Err(mpsc::error::TrySendError::Full(pending)) => {
                    self.stats.record_rejected();
                    pending.fail(ClientError::BufferFull);
                }
                Err(mpsc::error::TrySendError::Closed(pending)) => {
                    self.stats.record_rejected();
                    pending.fail(ClientError::ProducerClosed);
                }
            }
        }
    }

    /// Close the producer and wait for every accepted record to finish.
    ///
    /// New sends fail with `ProducerClosed` from the moment this is called.
    /// Records already accepted are sealed into batches and sent; when this
    /// returns, every one of them has its outcome. Calling it again (or
    /// concurrently) waits for the same drain and returns `Ok`.
    ///
    /// # Errors
    ///
    /// `Internal` if a pipeline task panicked.
    pub async fn close(&self) -> Result<()> {
        let inbound = self.inbound.write().await.take();
        if inbound.is_some() {
            info!("Closing producer");
        }
        drop(inbound);

        let mut tasks = self.tasks.lock().await;
        let Some(PipelineTasks { router, dispatcher }) = tasks.take() else {
            return Ok(());
        };

        let mut outcome = Ok(());
        if let Err(e) = router.await {
            error!(error = %e, "Router task failed");
            outcome = Err(ClientError::Internal(format!("router task failed: {}", e)));
        }
        if let Err(e) = dispatcher.await {
            error!(error = %e, "Network dispatcher task failed");
            outcome = Err(ClientError::Internal(format!(
                "network dispatcher task failed: {}",
                e
            )));
        }

        let stats = self.stats.snapshot();
        info!(
            records_delivered = stats.records_delivered,
            records_failed = stats.records_failed,
            "Producer closed"
        );
        outcome
    }

    /// Snapshot of the producer's counters.
    pub fn stats(&self) -> ProducerStatsSnapshot {
        self.stats.snapshot()
    }

    /// The producer's topic metadata cache.
    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }
}

/// Builder for [`Producer`].
///
/// A connector and a value serializer are required. Everything else starts
/// from [`ProducerConfig::default`] or from the config passed to
/// [`config`](Self::config); the setters below override single fields.
pub struct ProducerBuilder<K, V> {
    config: ProducerConfig,
    connector: Option<Arc<dyn Connector>>,
    key_serializer: Option<Arc<dyn Serializer<K>>>,
    value_serializer: Option<Arc<dyn Serializer<V>>>,
    partitioner: Option<Arc<dyn Partitioner>>,
}

impl<K, V> Default for ProducerBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ProducerBuilder<K, V> {
    pub fn new() -> Self {
        Self {
            config: ProducerConfig::default(),
            connector: None,
            key_serializer: None,
            value_serializer: None,
            partitioner: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ProducerConfig) -> Self {
        self.config = config;
        self
    }

    /// Cluster connector (required).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Serializer for record keys. Without one, keyed records are rejected.
    pub fn key_serializer<S>(mut self, serializer: S) -> Self
    where
        S: Serializer<K> + 'static,
    {
        self.key_serializer = Some(Arc::new(serializer));
        self
    }

    /// Serializer for record values (required).
    pub fn value_serializer<S>(mut self, serializer: S) -> Self
    where
        S: Serializer<V> + 'static,
    {
        self.value_serializer = Some(Arc::new(serializer));
        self
    }

    /// Custom partitioner, overriding `config.partitioner`.
    pub fn partitioner<P>(mut self, partitioner: P) -> Self
    where
        P: Partitioner + 'static,
    {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    /// Maximum records per batch; also the capacity of each pipeline queue.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    /// Maximum time an open batch waits for more records.
    pub fn linger(mut self, linger: Duration) -> Self {
        self.config.linger = linger;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn max_in_flight_requests(mut self, max: usize) -> Self {
        self.config.max_in_flight_requests = max;
        self
    }

    pub fn required_acks(mut self, acks: RequiredAcks) -> Self {
        self.config.required_acks = acks;
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.config.compression = compression;
        self
    }

    /// Fail fast with `BufferFull` instead of waiting when the inbound queue is full.
    pub fn block_on_buffer_full(mut self, block: bool) -> Self {
        self.config.block_on_buffer_full = block;
        self
    }

    pub fn metadata_expiry(mut self, expiry: Duration) -> Self {
        self.config.metadata_expiry = expiry;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Validate the configuration and start the pipeline tasks.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the connector or value serializer is missing, or the
    /// configuration fails [`ProducerConfig::validate`].
    pub async fn build(self) -> Result<Producer<K, V>> {
        let connector = self
            .connector
            .ok_or_else(|| ClientError::ConfigError("connector is required".to_string()))?;
        let value_serializer = self.value_serializer.ok_or_else(|| {
            ClientError::ConfigError("value serializer is required".to_string())
        })?;
        self.config.validate()?;

        let config = Arc::new(self.config);
        let partitioner = self
            .partitioner
            .unwrap_or_else(|| config.partitioner.build());
        let metadata = Arc::new(MetadataCache::new(
            Arc::clone(&connector),
            config.metadata_expiry,
        ));
        let stats = Arc::new(ProducerStats::default());

        let (dispatch_tx, dispatcher) = NetworkDispatcher::new(
            connector,
            Arc::clone(&metadata),
            Arc::clone(&config),
            Arc::clone(&stats),
        )
        .spawn();
        let (inbound, router) = spawn_router(BatchLimits::from_config(&config), dispatch_tx);

        info!(
            client_id = %config.client_id,
            bootstrap_servers = ?config.bootstrap_servers,
            batch_size = config.batch_size,
            linger_ms = config.linger.as_millis() as u64,
            acks = ?config.required_acks,
            "Producer started"
        );

        Ok(Producer {
            config,
            key_serializer: self.key_serializer,
            value_serializer,
            partitioner,
            metadata,
            inbound: RwLock::new(Some(inbound)),
            tasks: Mutex::new(Some(PipelineTasks { router, dispatcher })),
            stats,
        })
    }
}
