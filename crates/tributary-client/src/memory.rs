//! In-process cluster.
//!
//! [`InMemoryCluster`] implements [`Connector`] against plain in-memory
//! partition logs. It assigns sequential offsets per partition and can be
//! told to misbehave: fail produce requests or metadata fetches, or answer
//! slowly. Tests, benchmarks and the bundled example run the whole producer
//! pipeline against it.
//!
//! ```
//! use std::sync::Arc;
//! use tributary_client::{ClientError, InMemoryCluster};
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.create_topic("orders", 3);
//! cluster.fail_next_produce("orders", 0, ClientError::NetworkError(1, "reset".into()), 2);
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::RequiredAcks;
use crate::connector::{
    BrokerId, Connector, CorrelationId, EncodedRecord, ProduceRequest, ProduceResponse,
};
use crate::error::{ClientError, Result};

const BROKER_COUNT: i32 = 3;

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<EncodedRecord>,
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: HashMap<String, Vec<PartitionLog>>,
    leaders: HashMap<(String, u32), BrokerId>,
    produce_faults: HashMap<(String, u32), VecDeque<ClientError>>,
    metadata_faults: VecDeque<ClientError>,
    responses: HashMap<CorrelationId, ProduceResponse>,
    latency: Duration,
}

/// Connector backed by in-memory partition logs.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    next_correlation_id: AtomicI32,
    metadata_fetches: AtomicUsize,
    produce_requests: AtomicUsize,
    active_requests: AtomicUsize,
    peak_requests: AtomicUsize,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        // A panicking test thread must not wedge every later call.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create `topic` with `partitions` partitions, or resize it.
    ///
    /// Existing partition logs are kept when a topic grows.
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut state = self.state();
        let logs = state.topics.entry(topic.to_string()).or_default();
        logs.resize_with(partitions as usize, PartitionLog::default);
        for partition in 0..partitions {
            state
                .leaders
                .entry((topic.to_string(), partition))
                .or_insert(partition as i32 % BROKER_COUNT + 1);
        }
    }

    /// Move leadership of a partition to `broker`.
    pub fn set_leader(&self, topic: &str, partition: u32, broker: BrokerId) {
        self.state()
            .leaders
            .insert((topic.to_string(), partition), broker);
    }

    /// Fail the next `times` produce requests for a partition with `error`.
    pub fn fail_next_produce(&self, topic: &str, partition: u32, error: ClientError, times: usize) {
        let mut state = self.state();
        let faults = state
            .produce_faults
            .entry((topic.to_string(), partition))
            .or_default();
        faults.extend(std::iter::repeat(error).take(times));
    }

    /// Fail the next metadata fetch with `error`.
    pub fn fail_next_metadata(&self, error: ClientError) {
        self.state().metadata_faults.push_back(error);
    }

    /// Delay applied to every request write and response read.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Records stored in a partition, in offset order.
    pub fn records(&self, topic: &str, partition: u32) -> Vec<EncodedRecord> {
        self.state()
            .topics
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// Number of `fetch_partitions` calls served, including failed ones.
    pub fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }

    /// Number of `send_produce_request` calls served, including failed ones.
    pub fn produce_requests(&self) -> usize {
        self.produce_requests.load(Ordering::SeqCst)
    }

    /// Highest number of writes and reads observed in progress at once.
    pub fn peak_concurrent_requests(&self) -> usize {
        self.peak_requests.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) -> ActiveRequest<'_> {
        let active = self.active_requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_requests.fetch_max(active, Ordering::SeqCst);
        let guard = ActiveRequest(&self.active_requests);

        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }
}

struct ActiveRequest<'a>(&'a AtomicUsize);

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for InMemoryCluster {
    async fn fetch_partitions(&self, topic: &str) -> Result<Vec<u32>> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(error) = state.metadata_faults.pop_front() {
            return Err(error);
        }
        state
            .topics
            .get(topic)
            .map(|logs| (0..logs.len() as u32).collect())
            .ok_or_else(|| ClientError::TopicNotFound(topic.to_string()))
    }

    async fn leader(&self, topic: &str, partition: u32) -> Result<BrokerId> {
        self.state()
            .leaders
            .get(&(topic.to_string(), partition))
            .copied()
            .ok_or_else(|| ClientError::LeaderNotAvailable(topic.to_string(), partition))
    }

    async fn send_produce_request(
        &self,
        broker: BrokerId,
        request: &ProduceRequest,
    ) -> Result<CorrelationId> {
        self.produce_requests.fetch_add(1, Ordering::SeqCst);
        let _active = self.simulate_latency().await;

        let mut state = self.state();
        let key = (request.topic.clone(), request.partition);
        if let Some(error) = state
            .produce_faults
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        match state.leaders.get(&key) {
            Some(&leader) if leader == broker => {}
            _ => {
                return Err(ClientError::NotLeaderForPartition(
                    broker,
                    request.topic.clone(),
                    request.partition,
                ))
            }
        }

        let log = state
            .topics
            .get_mut(&request.topic)
            .and_then(|logs| logs.get_mut(request.partition as usize))
            .ok_or_else(|| {
                ClientError::BrokerError(
                    broker,
                    format!("unknown partition {}/{}", request.topic, request.partition),
                )
            })?;
        let base_offset = log.records.len() as u64;
        log.records.extend(request.records.iter().cloned());

        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::SeqCst);
        if request.acks != RequiredAcks::None {
            state
                .responses
                .insert(correlation_id, ProduceResponse { base_offset });
        }
        Ok(correlation_id)
    }

    async fn read_produce_response(
        &self,
        broker: BrokerId,
        correlation_id: CorrelationId,
    ) -> Result<ProduceResponse> {
        let _active = self.simulate_latency().await;
        self.state()
            .responses
            .remove(&correlation_id)
            .ok_or_else(|| {
                ClientError::NetworkError(
                    broker,
                    format!("no response for correlation id {}", correlation_id),
                )
            })
    }
}
