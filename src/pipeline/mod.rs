//! Job pipeline: producer, reader, worker pool, plus the uploader that puts
//! images into the system in the first place.
//!
//! # Architecture
//!
//! ```text
//!  HTTP ──► TransformationProducer ──publish──► Broker
//!                 │                               │
//!                 └──put(pending)──► StatusCache  │ recv
//!                                        ▲        ▼
//!                                        │   run_reader ──► bounded queue
//!                                        │                     │
//!                                        │        ┌────────────┼────────────┐
//!                                        │        ▼            ▼            ▼
//!                                        │     worker 0     worker 1 ... worker N-1
//!                                        │        │  TransformationProcessor
//!                                        └────────┘  (repo, blobs, transformer)
//!                                      put(done|failed)     │
//!                                                           └──► CleanupRunner (detached deletes)
//! ```
//!
//! # Shutdown
//!
//! Cancelling the token stops the reader only. It closes the queue, the
//! workers finish every job already forwarded, and the cleanup runner waits
//! for outstanding deletes. [`WorkerPool::join`] returns after all of that.

mod cleanup;
mod consumer;
mod pool;
mod producer;
mod upload;
mod worker;

pub use cleanup::{CleanupRunner, DEFAULT_CLEANUP_TIMEOUT};
pub use consumer::{run_reader, ReaderStats, READ_RETRY_DELAY};
pub use pool::{PoolConfig, PoolReport, WorkerPool, DEFAULT_QUEUE_FACTOR, DEFAULT_WORKERS};
pub use producer::TransformationProducer;
pub use upload::{ImageMetadata, ImageUploader};
pub use worker::{ProcessOutcome, TransformationProcessor};
