//! Network dispatcher.
//!
//! Takes sealed batches off a bounded queue and turns each into a produce
//! request, then resolves every record of the batch with the outcome.
//!
//! ## Architecture
//!
//! ```text
//!  accumulators ──► [ batch queue: max_in_flight_requests ]
//!                              │
//!                              ▼
//!               ┌─────────────────────────────┐
//!               │  dispatcher task            │
//!               │  - waiting: FIFO per TP     │ one request per partition
//!               │  - requests: JoinSet        │
//!               └──────────────┬──────────────┘
//!                              │ spawn
//!                              ▼
//!               ┌─────────────────────────────┐
//!               │  request task (per batch)   │
//!               │  slot ─► leader ─► write    │ in_flight / send_workers
//!               │        ─► read response     │ receive_workers
//!               │  retry with fixed backoff   │ slot released while waiting
//!               └─────────────────────────────┘
//! ```
//!
//! Ordering: a partition has at most one outstanding request. Its later
//! batches wait in the dispatcher's FIFO until the current one has a
//! terminal outcome (retries included), so offsets follow enqueue order.
//!
//! Back-pressure: the dispatcher stops pulling batches once it owns
//! `max_in_flight_requests` of them (running plus waiting). The queue then
//! fills and accumulators block on it.

use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, trace};

use crate::batch::ProducerBatch;
use crate::config::{ProducerConfig, RequiredAcks};
use crate::connector::{Connector, ProduceRequest};
use crate::error::{ClientError, Result};
use crate::metadata::MetadataCache;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::stats::ProducerStats;

type TopicPartition = (String, u32);

pub(crate) struct NetworkDispatcher {
    connector: Arc<dyn Connector>,
    metadata: Arc<MetadataCache>,
    config: Arc<ProducerConfig>,
    policy: RetryPolicy,
    in_flight: Semaphore,
    send_workers: Semaphore,
    receive_workers: Semaphore,
    stats: Arc<ProducerStats>,
}

impl NetworkDispatcher {
    pub fn new(
        connector: Arc<dyn Connector>,
        metadata: Arc<MetadataCache>,
        config: Arc<ProducerConfig>,
        stats: Arc<ProducerStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            policy: RetryPolicy::from_config(&config),
            in_flight: Semaphore::new(config.max_in_flight_requests),
            send_workers: Semaphore::new(config.send_workers),
            receive_workers: Semaphore::new(config.receive_workers),
            connector,
            metadata,
            config,
            stats,
        })
    }

    /// Start the dispatcher task.
    ///
    /// The task ends once every sender of the returned queue is dropped and
    /// all batches it accepted have an outcome.
    pub fn spawn(self: Arc<Self>) -> (mpsc::Sender<ProducerBatch>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.max_in_flight_requests);
        let task = tokio::spawn(self.run(rx));
        (tx, task)
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ProducerBatch>) {
        let limit = self.config.max_in_flight_requests;
        let mut waiting: HashMap<TopicPartition, VecDeque<ProducerBatch>> = HashMap::new();
        let mut requests: JoinSet<()> = JoinSet::new();
        let mut owners: HashMap<task::Id, TopicPartition> = HashMap::new();
        let mut queued = 0usize;
        let mut open = true;

        debug!(max_in_flight = limit, "Network dispatcher started");

        loop {
            if !open && requests.is_empty() {
                break;
            }
            let has_room = requests.len() + queued < limit;

            tokio::select! {
                received = rx.recv(), if open && has_room => match received {
                    Some(batch) => {
                        let tp = (batch.topic.clone(), batch.partition);
                        match waiting.get_mut(&tp) {
                            Some(queue) => {
                                trace!(topic = %tp.0, partition = tp.1, "Partition busy, queueing batch");
                                queue.push_back(batch);
                                queued += 1;
                            }
                            None => {
                                waiting.insert(tp.clone(), VecDeque::new());
                                let id = self.start(&mut requests, batch);
                                owners.insert(id, tp);
                            }
                        }
                    }
                    None => open = false,
                },
                Some(joined) = requests.join_next_with_id(), if !requests.is_empty() => {
                    let id = match joined {
                        Ok((id, ())) => id,
                        Err(e) => {
                            // The batch is gone with the task; the partition
                            // still moves on to its next batch.
                            error!(error = %e, "Request task did not complete");
                            e.id()
                        }
                    };
                    let Some(tp) = owners.remove(&id) else {
                        continue;
                    };
                    let next = waiting.get_mut(&tp).and_then(VecDeque::pop_front);
                    match next {
                        Some(batch) => {
                            queued -= 1;
                            let id = self.start(&mut requests, batch);
                            owners.insert(id, tp);
                        }
                        None => {
                            waiting.remove(&tp);
                        }
                    }
                }
            }
        }

        debug!("Network dispatcher stopped");
    }

    /// Spawn the request task for `batch` and return its task id, which the
    /// run loop maps back to the partition when the task is joined.
    fn start(self: &Arc<Self>, requests: &mut JoinSet<()>, batch: ProducerBatch) -> task::Id {
        let this = Arc::clone(self);
        let topic = batch.topic.clone();
        let partition = batch.partition;
        let records = batch.len();
        requests
            .spawn(async move {
                let delivery = AssertUnwindSafe(this.deliver(batch)).catch_unwind().await;
                if delivery.is_err() {
                    // The batch was dropped while unwinding; its futures
                    // resolve with an abandoned-delivery error.
                    error!(topic = %topic, partition, records, "Request task panicked");
                    this.stats.batch_failed(records);
                }
            })
            .id()
    }

    async fn deliver(&self, batch: ProducerBatch) {
        let request = batch.to_request(&self.config);
        let records = batch.len();
        debug!(
            topic = %request.topic,
            partition = request.partition,
            records,
            "Sending batch"
        );

        let request = &request;
        let result = retry_with_backoff(&self.policy, move |attempt| async move {
            if attempt > 0 {
                self.stats.retry();
            }
            let outcome = self.attempt(request).await;
            if let Err(e) = &outcome {
                if e.is_stale_metadata() {
                    self.metadata.invalidate(&request.topic).await;
                }
            }
            outcome
        })
        .await;

        match result {
            Ok(base_offset) => {
                trace!(
                    topic = %request.topic,
                    partition = request.partition,
                    base_offset = ?base_offset,
                    records,
                    "Batch delivered"
                );
                self.stats.batch_delivered(records);
                batch.complete(base_offset);
            }
            Err(e) => {
                error!(
                    topic = %request.topic,
                    partition = request.partition,
                    records,
                    error = %e,
                    "Batch failed"
                );
                self.stats.batch_failed(records);
                batch.fail(e);
            }
        }
    }

    /// One produce attempt. Holds an in-flight slot for its whole duration.
    async fn attempt(&self, request: &ProduceRequest) -> Result<Option<u64>> {
        let _slot = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| ClientError::Internal("in-flight limiter closed".to_string()))?;

        let broker = self
            .connector
            .leader(&request.topic, request.partition)
            .await?;

        let correlation_id = {
            let _writer = self
                .send_workers
                .acquire()
                .await
                .map_err(|_| ClientError::Internal("send worker pool closed".to_string()))?;
            let write_timeout = self.config.write_timeout;
            timeout(
                write_timeout,
                self.connector.send_produce_request(broker, request),
            )
            .await
            .map_err(|_| ClientError::Timeout(write_timeout))??
        };

        if request.acks == RequiredAcks::None {
            return Ok(None);
        }

        let _reader = self
            .receive_workers
            .acquire()
            .await
            .map_err(|_| ClientError::Internal("receive worker pool closed".to_string()))?;
        let deadline = self.config.response_deadline();
        let response = timeout(
            deadline,
            self.connector.read_produce_response(broker, correlation_id),
        )
        .await
        .map_err(|_| ClientError::Timeout(deadline))??;

        Ok(Some(response.base_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{BrokerId, CorrelationId, ProduceResponse};
    use crate::memory::InMemoryCluster;
    use crate::record::{pending, DeliveryFuture};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Panics on the first produce request, then defers to the cluster.
    struct PanicOnFirstWrite {
        cluster: Arc<InMemoryCluster>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl Connector for PanicOnFirstWrite {
        async fn fetch_partitions(&self, topic: &str) -> Result<Vec<u32>> {
            self.cluster.fetch_partitions(topic).await
        }

        async fn leader(&self, topic: &str, partition: u32) -> Result<BrokerId> {
            self.cluster.leader(topic, partition).await
        }

        async fn send_produce_request(
            &self,
            broker: BrokerId,
            request: &ProduceRequest,
        ) -> Result<CorrelationId> {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("connector bug");
            }
            self.cluster.send_produce_request(broker, request).await
        }

        async fn read_produce_response(
            &self,
            broker: BrokerId,
            correlation_id: CorrelationId,
        ) -> Result<ProduceResponse> {
            self.cluster.read_produce_response(broker, correlation_id).await
        }
    }

    fn dispatcher(
        cluster: &Arc<InMemoryCluster>,
        config: ProducerConfig,
    ) -> (Arc<NetworkDispatcher>, Arc<ProducerStats>) {
        dispatcher_over(cluster.clone(), config)
    }

    fn dispatcher_over(
        connector: Arc<dyn Connector>,
        config: ProducerConfig,
    ) -> (Arc<NetworkDispatcher>, Arc<ProducerStats>) {
        let metadata = Arc::new(MetadataCache::new(connector.clone(), config.metadata_expiry));
        let stats = Arc::new(ProducerStats::default());
        let dispatcher = NetworkDispatcher::new(connector, metadata, Arc::new(config), stats.clone());
        (dispatcher, stats)
    }

    fn batch_of(topic: &str, partition: u32, values: &[&'static str]) -> (ProducerBatch, Vec<DeliveryFuture>) {
        let mut futures = Vec::new();
        let mut batch: Option<ProducerBatch> = None;
        for value in values {
            let (record, future) = pending(topic, partition, value);
            futures.push(future);
            match batch.as_mut() {
                Some(b) => b.push(record),
                None => batch = Some(ProducerBatch::open(record)),
            }
        }
        (batch.expect("at least one value"), futures)
    }

    #[tokio::test]
    async fn test_batch_gets_sequential_offsets() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 1);
        let (dispatcher, stats) = dispatcher(&cluster, ProducerConfig::default());
        let (tx, task) = dispatcher.spawn();

        let (first, first_futures) = batch_of("orders", 0, &["a", "b"]);
        let (second, second_futures) = batch_of("orders", 0, &["c"]);
        tx.send(first).await.unwrap();
        tx.send(second).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let mut offsets = Vec::new();
        for future in first_futures.into_iter().chain(second_futures) {
            offsets.push(future.await.unwrap().offset);
        }
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(stats.snapshot().batches_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_request_per_partition() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 1);
        cluster.set_latency(Duration::from_millis(50));
        let (dispatcher, _) = dispatcher(&cluster, ProducerConfig::default());
        let (tx, task) = dispatcher.spawn();

        let mut futures = Vec::new();
        for value in ["a", "b", "c", "d"] {
            let (batch, mut f) = batch_of("orders", 0, &[value]);
            tx.send(batch).await.unwrap();
            futures.append(&mut f);
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(cluster.peak_concurrent_requests(), 1);
        for (expected, future) in futures.into_iter().enumerate() {
            assert_eq!(future.await.unwrap().offset, Some(expected as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_in_flight_bound() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 8);
        cluster.set_latency(Duration::from_millis(50));
        let config = ProducerConfig {
            max_in_flight_requests: 3,
            ..Default::default()
        };
        let (dispatcher, _) = dispatcher(&cluster, config);
        let (tx, task) = dispatcher.spawn();

        let mut futures = Vec::new();
        for partition in 0..8 {
            let (batch, mut f) = batch_of("orders", partition, &["x"]);
            tx.send(batch).await.unwrap();
            futures.append(&mut f);
        }
        drop(tx);
        task.await.unwrap();

        assert!(cluster.peak_concurrent_requests() <= 3);
        for future in futures {
            assert!(future.await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_fails_whole_batch() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 1);
        let error = ClientError::NetworkError(1, "connection reset".into());
        cluster.fail_next_produce("orders", 0, error.clone(), 10);
        let config = ProducerConfig {
            retries: 2,
            ..Default::default()
        };
        let (dispatcher, stats) = dispatcher(&cluster, config);
        let (tx, task) = dispatcher.spawn();

        let (batch, futures) = batch_of("orders", 0, &["a", "b"]);
        tx.send(batch).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(cluster.produce_requests(), 3);
        for future in futures {
            assert_eq!(future.await.unwrap_err().error, error);
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.records_failed, 2);
    }

    #[tokio::test]
    async fn test_acks_none_resolves_without_offset() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("logs", 1);
        let config = ProducerConfig {
            required_acks: RequiredAcks::None,
            ..Default::default()
        };
        let (dispatcher, _) = dispatcher(&cluster, config);
        let (tx, task) = dispatcher.spawn();

        let (batch, futures) = batch_of("logs", 0, &["fire", "forget"]);
        tx.send(batch).await.unwrap();
        drop(tx);
        task.await.unwrap();

        for future in futures {
            assert_eq!(future.await.unwrap().offset, None);
        }
        assert_eq!(cluster.records("logs", 0).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_response_times_out() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 1);
        cluster.set_latency(Duration::from_secs(10));
        let config = ProducerConfig {
            retries: 0,
            write_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let (dispatcher, _) = dispatcher(&cluster, config);
        let (tx, task) = dispatcher.spawn();

        let (batch, futures) = batch_of("orders", 0, &["late"]);
        tx.send(batch).await.unwrap();
        drop(tx);
        task.await.unwrap();

        for future in futures {
            assert_eq!(
                future.await.unwrap_err().error,
                ClientError::Timeout(Duration::from_secs(1))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_read_hits_response_deadline() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 1);
        // The write finishes in 3s, inside write_timeout; the read would
        // take another 3s against a 1s + 1s response deadline.
        cluster.set_latency(Duration::from_secs(3));
        let config = ProducerConfig {
            retries: 0,
            write_timeout: Duration::from_secs(4),
            read_timeout: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let (dispatcher, stats) = dispatcher(&cluster, config);
        let (tx, task) = dispatcher.spawn();

        let (batch, futures) = batch_of("orders", 0, &["slow"]);
        tx.send(batch).await.unwrap();
        drop(tx);
        task.await.unwrap();

        for future in futures {
            assert_eq!(
                future.await.unwrap_err().error,
                ClientError::Timeout(Duration::from_secs(2))
            );
        }
        // The write itself went through.
        assert_eq!(cluster.records("orders", 0).len(), 1);
        assert_eq!(stats.snapshot().records_failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_request_releases_partition() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_topic("orders", 1);
        let connector = Arc::new(PanicOnFirstWrite {
            cluster: cluster.clone(),
            armed: AtomicBool::new(true),
        });
        let (dispatcher, stats) = dispatcher_over(connector, ProducerConfig::default());
        let (tx, task) = dispatcher.spawn();

        let (first, first_futures) = batch_of("orders", 0, &["lost"]);
        let (second, second_futures) = batch_of("orders", 0, &["a", "b"]);
        let (third, third_futures) = batch_of("orders", 0, &["c"]);
        tx.send(first).await.unwrap();
        tx.send(second).await.unwrap();
        tx.send(third).await.unwrap();
        drop(tx);
        task.await.unwrap();

        for future in first_futures {
            assert!(matches!(
                future.await.unwrap_err().error,
                ClientError::Internal(_)
            ));
        }
        let mut offsets = Vec::new();
        for future in second_futures.into_iter().chain(third_futures) {
            offsets.push(future.await.unwrap().offset);
        }
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(stats.snapshot().records_failed, 1);
    }
}
