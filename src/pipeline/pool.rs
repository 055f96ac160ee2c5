use std::sync::Arc;

use async_channel::Receiver;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::consumer::{run_reader, ReaderStats};
use super::worker::{ProcessOutcome, TransformationProcessor};
use crate::broker::{Delivery, MessageSource};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Default queue capacity multiplier.
pub const DEFAULT_QUEUE_FACTOR: usize = 2;

/// Sizing of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_factor: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_factor: DEFAULT_QUEUE_FACTOR,
        }
    }
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Bounded queue size between reader and workers.
    pub fn queue_capacity(&self) -> usize {
        (self.workers * self.queue_factor).max(1)
    }
}

/// Counters reported once the pool has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub reader: ReaderStats,
    /// Deliveries taken off the queue, across all workers.
    pub processed: usize,
    pub malformed: usize,
    pub status_lost: usize,
}

/// A running reader plus its workers.
///
/// Cancelling the token stops the reader. Workers do not watch the token:
/// they keep going until the queue is closed and empty, so every forwarded
/// delivery is finished before [`join`](Self::join) returns.
pub struct WorkerPool {
    reader: JoinHandle<ReaderStats>,
    workers: Vec<JoinHandle<WorkerStats>>,
    source: Arc<dyn MessageSource>,
    processor: Arc<TransformationProcessor>,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    processed: usize,
    malformed: usize,
    status_lost: usize,
}

impl WorkerPool {
    /// Spawn the reader and `config.workers` workers.
    pub fn start(
        config: PoolConfig,
        source: Arc<dyn MessageSource>,
        processor: Arc<TransformationProcessor>,
        cancel: CancellationToken,
    ) -> Self {
        let workers_count = config.workers.max(1);
        let (sender, receiver) = async_channel::bounded(config.queue_capacity());

        info!(
            workers = workers_count,
            queue_capacity = config.queue_capacity(),
            "Starting worker pool"
        );

        let workers = (0..workers_count)
            .map(|id| {
                tokio::spawn(
                    run_worker(receiver.clone(), source.clone(), processor.clone())
                        .instrument(info_span!("worker", worker_id = id)),
                )
            })
            .collect();

        // The reader's sender is the only one; workers hold receivers
        drop(receiver);

        let reader = tokio::spawn(
            run_reader(source.clone(), sender, cancel).instrument(info_span!("reader")),
        );

        Self {
            reader,
            workers,
            source,
            processor,
        }
    }

    /// Wait for the reader and every worker to stop, release the source once
    /// the last acknowledgement is in, then wait for pending cleanup tasks.
    pub async fn join(self) -> PoolReport {
        let mut report = PoolReport::default();

        match self.reader.await {
            Ok(stats) => report.reader = stats,
            Err(e) => error!(error = %e, "Reader task failed"),
        }

        for result in join_all(self.workers).await {
            match result {
                Ok(stats) => {
                    report.processed += stats.processed;
                    report.malformed += stats.malformed;
                    report.status_lost += stats.status_lost;
                }
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        self.source.close();
        self.processor.cleanup().shutdown().await;

        info!(
            forwarded = report.reader.forwarded,
            processed = report.processed,
            "Worker pool stopped"
        );
        report
    }
}

async fn run_worker(
    queue: Receiver<Delivery>,
    source: Arc<dyn MessageSource>,
    processor: Arc<TransformationProcessor>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    info!("Worker started");

    while let Ok(delivery) = queue.recv().await {
        let outcome = processor.process(&delivery).await;
        stats.processed += 1;

        match &outcome {
            ProcessOutcome::Malformed => stats.malformed += 1,
            ProcessOutcome::StatusLost(_) => stats.status_lost += 1,
            ProcessOutcome::Completed(_) => {}
        }

        if outcome.should_ack() {
            if let Err(e) = source.ack(&delivery).await {
                warn!(offset = delivery.offset, error = %e, "Failed to acknowledge message");
            }
        }
    }

    info!(processed = stats.processed, "Worker stopped");
    stats
}
