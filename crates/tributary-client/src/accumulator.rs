//! Per-partition record accumulator.
//!
//! Each (topic, partition) the producer has written to owns one accumulator
//! task. The task is the only owner of the partition's open batch, so no lock
//! guards it: records arrive over a bounded queue in enqueue order and leave
//! as sealed [`ProducerBatch`]es on the dispatcher queue.
//!
//! ## Sealing rules
//!
//! - A record that does not fit the open batch seals it and opens the next
//! - A batch that reaches `batch_size` records or `max_batch_bytes` seals at once
//! - An open batch older than `linger` seals, checked on a timer and after
//!   every append
//! - Closing the input seals whatever is open, then the task ends
//!
//! A full dispatcher queue blocks only this task; its own input queue then
//! fills and pushes back on the partition's upstream.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::batch::{BatchLimits, ProducerBatch};
use crate::error::ClientError;
use crate::record::PendingRecord;

/// Input side of a running accumulator.
#[derive(Debug)]
pub(crate) struct AccumulatorHandle {
    pub tx: mpsc::Sender<PendingRecord>,
    pub task: JoinHandle<()>,
}

pub(crate) struct RecordAccumulator {
    topic: String,
    partition: u32,
    limits: BatchLimits,
    open: Option<ProducerBatch>,
    dispatcher: mpsc::Sender<ProducerBatch>,
}

impl RecordAccumulator {
    /// Start the accumulator task for one partition.
    pub fn spawn(
        topic: String,
        partition: u32,
        limits: BatchLimits,
        dispatcher: mpsc::Sender<ProducerBatch>,
    ) -> AccumulatorHandle {
        let (tx, rx) = mpsc::channel(limits.batch_size);
        let accumulator = Self {
            topic,
            partition,
            limits,
            open: None,
            dispatcher,
        };
        let task = tokio::spawn(accumulator.run(rx));
        AccumulatorHandle { tx, task }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PendingRecord>) {
        trace!(topic = %self.topic, partition = self.partition, "Accumulator started");

        loop {
            let deadline = self.linger_deadline();
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => self.append(record).await,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.seal("linger").await;
                }
            }
        }

        self.seal("close").await;
        trace!(topic = %self.topic, partition = self.partition, "Accumulator stopped");
    }

    fn linger_deadline(&self) -> Option<Instant> {
        self.open
            .as_ref()
            .map(|batch| batch.created_at() + self.limits.linger)
    }

    async fn append(&mut self, record: PendingRecord) {
        match self.open.take() {
            Some(mut batch) if batch.has_room_for(&record, &self.limits) => {
                batch.push(record);
                self.open = Some(batch);
            }
            Some(batch) => {
                self.send(batch, "size").await;
                self.open = Some(ProducerBatch::open(record));
            }
            None => self.open = Some(ProducerBatch::open(record)),
        }

        let full = self
            .open
            .as_ref()
            .is_some_and(|batch| batch.is_full(&self.limits));
        if full {
            self.seal("size").await;
        } else if self.linger_deadline().is_some_and(|d| d <= Instant::now()) {
            self.seal("linger").await;
        }
    }

    async fn seal(&mut self, reason: &'static str) {
        if let Some(batch) = self.open.take() {
            self.send(batch, reason).await;
        }
    }

    async fn send(&mut self, batch: ProducerBatch, reason: &'static str) {
        debug!(
            topic = %self.topic,
            partition = self.partition,
            records = batch.len(),
            bytes = batch.size_bytes(),
            reason,
            "Sealing batch"
        );
        if let Err(mpsc::error::SendError(batch)) = self.dispatcher.send(batch).await {
            batch.fail(ClientError::Internal(
                "network dispatcher stopped before batch was sent".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::pending;
    use std::time::Duration;

    fn limits(batch_size: usize, linger_ms: u64) -> BatchLimits {
        BatchLimits {
            batch_size,
            max_batch_bytes: 1024 * 1024,
            linger: Duration::from_millis(linger_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_seals_immediately() {
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(4);
        let handle = RecordAccumulator::spawn("t".into(), 0, limits(3, 60_000), dispatch_tx);

        let mut futures = Vec::new();
        for value in ["a", "b", "c"] {
            let (record, future) = pending("t", 0, value);
            handle.tx.send(record).await.unwrap();
            futures.push(future);
        }

        let started = Instant::now();
        let batch = dispatch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_seals_partial_batch() {
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(4);
        let handle = RecordAccumulator::spawn("t".into(), 0, limits(1000, 1000), dispatch_tx);

        let started = Instant::now();
        let (first, _f1) = pending("t", 0, "a");
        let (second, _f2) = pending("t", 0, "b");
        handle.tx.send(first).await.unwrap();
        handle.tx.send(second).await.unwrap();

        let batch = dispatch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_starts_new_batch_in_order() {
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(4);
        let handle = RecordAccumulator::spawn("t".into(), 0, limits(2, 500), dispatch_tx);

        let mut futures = Vec::new();
        for value in ["1", "2", "3"] {
            let (record, future) = pending("t", 0, value);
            handle.tx.send(record).await.unwrap();
            futures.push(future);
        }
        drop(handle.tx);

        let first = dispatch_rx.recv().await.unwrap();
        let second = dispatch_rx.recv().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);

        first.complete(Some(0));
        second.complete(Some(2));
        let offsets: Vec<_> = futures::future::join_all(futures)
            .await
            .into_iter()
            .map(|r| r.unwrap().offset)
            .collect();
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_limit_seals_batch() {
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(4);
        let limits = BatchLimits {
            batch_size: 1000,
            // Two 26-byte records fit, a third does not.
            max_batch_bytes: 60,
            linger: Duration::from_secs(60),
        };
        let handle = RecordAccumulator::spawn("t".into(), 0, limits, dispatch_tx);

        for _ in 0..3 {
            let (record, _future) = pending("t", 0, "0123456789");
            handle.tx.send(record).await.unwrap();
        }

        let batch = dispatch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_seals_open_batch() {
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(4);
        let handle = RecordAccumulator::spawn("t".into(), 0, limits(1000, 60_000), dispatch_tx);

        let (record, _future) = pending("t", 0, "last");
        handle.tx.send(record).await.unwrap();
        drop(handle.tx);
        handle.task.await.unwrap();

        let batch = dispatch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(dispatch_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stopped_dispatcher_fails_records() {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(4);
        drop(dispatch_rx);
        let handle = RecordAccumulator::spawn("t".into(), 0, limits(1, 60_000), dispatch_tx);

        let (record, future) = pending("t", 0, "orphan");
        handle.tx.send(record).await.unwrap();

        let failure = future.await.unwrap_err();
        assert!(matches!(failure.error, ClientError::Internal(_)));
    }
}
