//! Dispatch router.
//!
//! Fans records out from the producer's single inbound queue to one
//! accumulator per (topic, partition), in two tiers:
//!
//! ```text
//! inbound ──► router task ──► topic task "orders" ──► accumulator orders/0
//!                │                    └─────────────► accumulator orders/1
//!                └──────────► topic task "audit"  ──► accumulator audit/0
//! ```
//!
//! Topic tasks and accumulators are created the first time a record for them
//! shows up and live until the producer closes. Every queue is bounded by
//! `batch_size`, so a slow partition pushes back on its topic task and from
//! there on the router.
//!
//! Shutdown runs top-down: when the inbound queue closes, the router closes
//! every topic queue and waits for the topic tasks; each topic task closes
//! its accumulators' queues and waits for them, which seals their last
//! batches.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::accumulator::{AccumulatorHandle, RecordAccumulator};
use crate::batch::{BatchLimits, ProducerBatch};
use crate::error::ClientError;
use crate::record::PendingRecord;

struct TopicLane {
    tx: mpsc::Sender<PendingRecord>,
    task: JoinHandle<()>,
}

/// Start the router task.
///
/// Returns the inbound queue (capacity `batch_size`) and the task handle.
/// The task ends after the inbound queue is closed and every topic task and
/// accumulator beneath it has finished.
pub(crate) fn spawn_router(
    limits: BatchLimits,
    dispatcher: mpsc::Sender<ProducerBatch>,
) -> (mpsc::Sender<PendingRecord>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(limits.batch_size);
    let task = tokio::spawn(route(rx, limits, dispatcher));
    (tx, task)
}

async fn route(
    mut inbound: mpsc::Receiver<PendingRecord>,
    limits: BatchLimits,
    dispatcher: mpsc::Sender<ProducerBatch>,
) {
    let mut topics: HashMap<String, TopicLane> = HashMap::new();

    while let Some(record) = inbound.recv().await {
        let lane = match topics.entry(record.topic.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(topic = %entry.key(), "Starting topic task");
                let (tx, rx) = mpsc::channel(limits.batch_size);
                let task = tokio::spawn(route_topic(
                    entry.key().clone(),
                    rx,
                    limits,
                    dispatcher.clone(),
                ));
                entry.insert(TopicLane { tx, task })
            }
        };

        if let Err(mpsc::error::SendError(record)) = lane.tx.send(record).await {
            let topic = record.topic.clone();
            record.fail(ClientError::Internal(format!(
                "topic task for '{}' stopped",
                topic
            )));
        }
    }

    drop(dispatcher);
    let tasks: Vec<(String, JoinHandle<()>)> = topics
        .into_iter()
        .map(|(topic, lane)| (topic, lane.task))
        .collect();
    for (topic, task) in tasks {
        if let Err(e) = task.await {
            error!(topic = %topic, error = %e, "Topic task failed");
        }
    }
    debug!("Router stopped");
}

/// Partition ids below this index the arena directly; larger ids go to a map
/// so a sparse id cannot force a huge allocation.
const DENSE_PARTITIONS: usize = 4096;

/// Accumulators of one topic, keyed by partition id.
#[derive(Default)]
struct Accumulators {
    dense: Vec<Option<AccumulatorHandle>>,
    sparse: HashMap<u32, AccumulatorHandle>,
}

impl Accumulators {
    fn get_or_spawn(
        &mut self,
        partition: u32,
        spawn: impl FnOnce() -> AccumulatorHandle,
    ) -> &mut AccumulatorHandle {
        let index = partition as usize;
        if index < DENSE_PARTITIONS {
            if index >= self.dense.len() {
                self.dense.resize_with(index + 1, || None);
            }
            self.dense[index].get_or_insert_with(spawn)
        } else {
            self.sparse.entry(partition).or_insert_with(spawn)
        }
    }

    fn into_handles(self) -> Vec<AccumulatorHandle> {
        self.dense
            .into_iter()
            .flatten()
            .chain(self.sparse.into_values())
            .collect()
    }
}

/// Per-topic tier: owns the topic's accumulators and forwards each record to
/// its partition's accumulator.
async fn route_topic(
    topic: String,
    mut rx: mpsc::Receiver<PendingRecord>,
    limits: BatchLimits,
    dispatcher: mpsc::Sender<ProducerBatch>,
) {
    let mut accumulators = Accumulators::default();

    while let Some(record) = rx.recv().await {
        let partition = record.partition;
        let handle = accumulators.get_or_spawn(partition, || {
            debug!(topic = %topic, partition, "Starting accumulator");
            RecordAccumulator::spawn(topic.clone(), partition, limits, dispatcher.clone())
        });

        if let Err(mpsc::error::SendError(record)) = handle.tx.send(record).await {
            let partition = record.partition;
            record.fail(ClientError::Internal(format!(
                "accumulator for {}/{} stopped",
                topic, partition
            )));
        }
    }

    let live = accumulators.into_handles();
    info!(topic = %topic, accumulators = live.len(), "Closing topic");
    drop(dispatcher);

    let tasks: Vec<JoinHandle<()>> = live.into_iter().map(|handle| handle.task).collect();
    for task in tasks {
        if let Err(e) = task.await {
            error!(topic = %topic, error = %e, "Accumulator task failed");
        }
    }
}
