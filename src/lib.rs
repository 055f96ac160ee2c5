//! # imago-pipeline
//!
//! An asynchronous image transformation pipeline.
//!
//! Clients submit a transformation request over HTTP and immediately get a
//! callback id back. The request travels through a message broker to a pool
//! of workers that download the source image from blob storage, apply the
//! requested operations, upload the result and update the image's metadata.
//! Progress is recorded in a TTL status cache that clients poll.
//!
//! ## Features
//!
//! - **Decoupled intake**: publishing is the only thing the API waits on
//! - **Bounded concurrency**: a fixed worker pool fed by a bounded queue
//! - **At-least-once**: broker messages are acknowledged only after the job's
//!   terminal status has been written
//! - **Pluggable backends**: Kafka or in-memory broker, Redis or in-memory
//!   status cache, S3 or local blobs, PostgreSQL or in-memory metadata
//!
//! ## Architecture
//!
//! - [`model`] - Requests, operation sets, statuses and metadata records
//! - [`transform`] - Decode, resize/crop/rotate/filter, encode
//! - [`storage`] - Blob store trait with S3 and local backends
//! - [`status`] - Status cache over Redis or an in-process LRU
//! - [`broker`] - Publisher/source traits with Kafka and in-memory backends
//! - [`repository`] - Image and user metadata over PostgreSQL or memory
//! - [`pipeline`] - Producer, consumer reader, worker pool, orphan cleanup
//! - [`server`] - Axum-based HTTP API
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use imago_pipeline::{
//!     create_router, AppState, MemoryBroker, MessagePublisher, RouterConfig, StatusCache,
//!     TransformationProducer,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker: Arc<dyn MessagePublisher> = Arc::new(MemoryBroker::new());
//!     let statuses = StatusCache::in_memory(Duration::from_secs(3600));
//!     let producer = TransformationProducer::new(broker, statuses);
//!
//!     let router = create_router(AppState::new(producer), RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod repository;
pub mod server;
pub mod status;
pub mod storage;
pub mod transform;

// Re-export commonly used types
pub use broker::{Delivery, MemoryBroker, MessagePublisher, MessageSource, OffsetTracker};
#[cfg(feature = "kafka")]
pub use broker::{KafkaConfig, KafkaPublisher, KafkaSource};
pub use config::{Cli, Command, ServeConfig, StandaloneConfig, StorageBackend, WorkerConfig};
pub use error::{
    BrokerError, CacheError, EnqueueError, JobError, RepositoryError, StorageError,
    TransformError, UploadError,
};
pub use model::{
    CallbackId, Crop, Filters, Image, ImageUpdate, JobState, OperationSet, Resize,
    TransformationRequest, TransformationStatus, User,
};
pub use pipeline::{
    run_reader, CleanupRunner, ImageMetadata, ImageUploader, PoolConfig, PoolReport,
    ProcessOutcome, ReaderStats, TransformationProcessor, TransformationProducer, WorkerPool, DEFAULT_CLEANUP_TIMEOUT,
    DEFAULT_QUEUE_FACTOR, DEFAULT_WORKERS,
};
pub use repository::{
    ImageRepository, MemoryRepository, NewImage, PgRepository, UserRepository,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use status::{
    MemoryStatusStore, RedisStatusStore, StatusCache, StatusStore, DEFAULT_STATUS_TTL,
};
pub use storage::{
    blob_path, change_extension, create_s3_client, BlobStore, LocalBlobStore, S3BlobStore,
};
pub use transform::{
    ImageCodec, ImageTransformer, OutputFormat, DEFAULT_JPEG_QUALITY, SUPPORTED_FORMATS,
};
