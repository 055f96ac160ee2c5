//! imago-pipeline - asynchronous image transformation service.
//!
//! This binary wires the API, the broker, the worker pool and the backing
//! stores according to the selected subcommand.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imago_pipeline::{
    broker::{MemoryBroker, MessagePublisher, MessageSource},
    config::{
        Cli, Command, DatabaseArgs, HttpArgs, KafkaArgs, PoolArgs, ServeConfig, StandaloneConfig,
        StatusArgs, StorageArgs, StorageBackend, WorkerConfig,
    },
    pipeline::{
        CleanupRunner, ImageUploader, TransformationProcessor, TransformationProducer, WorkerPool,
    },
    repository::{ImageRepository, MemoryRepository, PgRepository, UserRepository},
    server::{create_router, AppState, RouterConfig},
    status::{MemoryStatusStore, RedisStatusStore, StatusCache},
    storage::{create_s3_client, BlobStore, LocalBlobStore, S3BlobStore},
    transform::ImageTransformer,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.into_command() {
        Command::Serve(config) => {
            init_logging(config.verbose);
            run_serve(config).await
        }
        Command::Worker(config) => {
            init_logging(config.verbose);
            run_worker(config).await
        }
        Command::Standalone(config) => {
            init_logging(config.verbose);
            run_standalone(config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> Result<(), String> {
    config
        .validate()
        .map_err(|e| format!("Configuration error: {}", e))?;

    info!("Configuration:");
    info!("  Kafka: {} (topic {})", config.kafka.kafka_brokers, config.kafka.kafka_topic);
    log_status_config(&config.status);
    log_database_config(&config.database);

    let statuses = build_status_cache(&config.status).await?;
    let publisher = build_kafka_publisher(&config.kafka)?;
    let producer = TransformationProducer::new(publisher, statuses);

    let mut state = AppState::new(producer);
    if config.database.database_url.is_some() {
        let repos = build_repositories(&config.database).await?;
        state = state.with_users(repos.users);
    } else {
        warn!("  Users: not checked (no database configured)");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    serve_http(&config.http, state, shutdown).await
}

// =============================================================================
// Worker Command
// =============================================================================

async fn run_worker(config: WorkerConfig) -> Result<(), String> {
    config
        .validate()
        .map_err(|e| format!("Configuration error: {}", e))?;

    info!("Configuration:");
    info!(
        "  Kafka: {} (topic {}, group {})",
        config.kafka.kafka_brokers, config.kafka.kafka_topic, config.kafka.kafka_group_id
    );
    log_status_config(&config.status);
    log_storage_config(&config.storage);
    log_database_config(&config.database);
    log_pool_config(&config.pool);

    let statuses = build_status_cache(&config.status).await?;
    let blobs = build_blob_store(&config.storage).await;
    let repos = build_repositories(&config.database).await?;
    let source = build_kafka_source(&config.kafka)?;

    let processor = build_processor(&config.pool, repos.images, blobs, statuses);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let pool = WorkerPool::start(config.pool.pool_config(), source, processor, shutdown);
    let report = pool.join().await;

    info!(
        forwarded = report.reader.forwarded,
        processed = report.processed,
        malformed = report.malformed,
        status_lost = report.status_lost,
        "Worker pool stopped"
    );
    Ok(())
}

// =============================================================================
// Standalone Command
// =============================================================================

async fn run_standalone(config: StandaloneConfig) -> Result<(), String> {
    config
        .validate()
        .map_err(|e| format!("Configuration error: {}", e))?;

    info!("Configuration:");
    info!("  Broker: in-memory");
    log_status_config(&config.status);
    log_storage_config(&config.storage);
    log_database_config(&config.database);
    log_pool_config(&config.pool);

    let statuses = build_status_cache(&config.status).await?;
    let blobs = build_blob_store(&config.storage).await;
    let repos = build_repositories(&config.database).await?;

    let broker = Arc::new(MemoryBroker::new());
    let publisher: Arc<dyn MessagePublisher> = broker.clone();
    let source: Arc<dyn MessageSource> = broker.clone();

    let producer = TransformationProducer::new(publisher, statuses.clone());
    let mut uploader = ImageUploader::new(repos.images.clone(), blobs.clone());
    let mut state = AppState::new(producer);
    if config.database.database_url.is_some() {
        uploader = uploader.with_users(repos.users.clone());
        state = state.with_users(repos.users);
    }
    let state = state.with_uploader(uploader);
    info!("  Uploads: POST /users/{{user_id}}/images");
    let processor = build_processor(&config.pool, repos.images, blobs, statuses);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let pool = WorkerPool::start(
        config.pool.pool_config(),
        source,
        processor,
        shutdown.clone(),
    );

    let served = serve_http(&config.http, state, shutdown.clone()).await;

    // The server may have failed on its own; stop the reader either way
    shutdown.cancel();
    let report = pool.join().await;

    let unacked = broker.unacked().len() + broker.queued();
    if unacked > 0 {
        warn!(
            unacked = unacked,
            "In-memory jobs left unfinished are lost on exit"
        );
    }

    info!(
        forwarded = report.reader.forwarded,
        processed = report.processed,
        "Worker pool stopped"
    );
    served
}

// =============================================================================
// Component Builders
// =============================================================================

struct Repositories {
    images: Arc<dyn ImageRepository>,
    users: Arc<dyn UserRepository>,
}

/// Redis when a URL is configured, otherwise an in-process store.
async fn build_status_cache(config: &StatusArgs) -> Result<StatusCache, String> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStatusStore::connect(url)
                .await
                .map_err(|e| format!("Failed to connect to Redis: {}", e))?;
            Ok(StatusCache::new(Arc::new(store), config.ttl()))
        }
        None => Ok(StatusCache::new(
            Arc::new(MemoryStatusStore::new()),
            config.ttl(),
        )),
    }
}

async fn build_blob_store(config: &StorageArgs) -> Arc<dyn BlobStore> {
    match config.storage {
        StorageBackend::S3 => {
            let client =
                create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            let bucket = config.s3_bucket.clone().unwrap_or_default();
            Arc::new(S3BlobStore::new(client, bucket, config.s3_endpoint.clone()))
        }
        StorageBackend::Local => Arc::new(LocalBlobStore::new(
            config.local_root.clone(),
            config.local_base_url.clone(),
        )),
    }
}

/// PostgreSQL when a URL is configured, otherwise an empty in-memory store.
async fn build_repositories(config: &DatabaseArgs) -> Result<Repositories, String> {
    match &config.database_url {
        Some(url) => {
            let repo = PgRepository::connect(url, config.db_max_connections)
                .await
                .map_err(|e| format!("Failed to connect to database: {}", e))?;
            if config.apply_schema {
                repo.apply_schema()
                    .await
                    .map_err(|e| format!("Failed to apply schema: {}", e))?;
                info!("  Database schema applied");
            }
            let repo = Arc::new(repo);
            Ok(Repositories {
                images: repo.clone(),
                users: repo,
            })
        }
        None => {
            let repo = Arc::new(MemoryRepository::new());
            Ok(Repositories {
                images: repo.clone(),
                users: repo,
            })
        }
    }
}

fn build_processor(
    config: &PoolArgs,
    images: Arc<dyn ImageRepository>,
    blobs: Arc<dyn BlobStore>,
    statuses: StatusCache,
) -> Arc<TransformationProcessor> {
    Arc::new(TransformationProcessor::new(
        images,
        blobs,
        statuses,
        ImageTransformer::with_jpeg_quality(config.jpeg_quality),
        CleanupRunner::new(config.cleanup_timeout()),
    ))
}

#[cfg(feature = "kafka")]
fn build_kafka_publisher(config: &KafkaArgs) -> Result<Arc<dyn MessagePublisher>, String> {
    let publisher = imago_pipeline::broker::KafkaPublisher::new(&config.kafka_config())
        .map_err(|e| format!("Failed to create Kafka producer: {}", e))?;
    Ok(Arc::new(publisher))
}

#[cfg(not(feature = "kafka"))]
fn build_kafka_publisher(_config: &KafkaArgs) -> Result<Arc<dyn MessagePublisher>, String> {
    Err("Built without the `kafka` feature; use the `standalone` command".to_string())
}

#[cfg(feature = "kafka")]
fn build_kafka_source(config: &KafkaArgs) -> Result<Arc<dyn MessageSource>, String> {
    let source = imago_pipeline::broker::KafkaSource::new(&config.kafka_config())
        .map_err(|e| format!("Failed to create Kafka consumer: {}", e))?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "kafka"))]
fn build_kafka_source(_config: &KafkaArgs) -> Result<Arc<dyn MessageSource>, String> {
    Err("Built without the `kafka` feature; use the `standalone` command".to_string())
}

/// Build RouterConfig from the HTTP options.
fn build_router_config(config: &HttpArgs) -> RouterConfig {
    let mut router_config = RouterConfig::new();

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Serving and Shutdown
// =============================================================================

async fn serve_http(
    config: &HttpArgs,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let router = create_router(state, build_router_config(config));
    let addr = config.bind_address();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl -X POST http://{}/jobs -d '<request json>'", addr);
    info!("    curl http://{}/jobs/<status_id>", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| format!("Server error: {}", e))
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    token.cancel();
}

// =============================================================================
// Logging
// =============================================================================

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "imago_pipeline=debug,tower_http=debug"
    } else {
        "imago_pipeline=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_status_config(config: &StatusArgs) {
    match config.redis_url {
        Some(_) => info!("  Status cache: redis (ttl {}s)", config.status_ttl_secs),
        None => info!("  Status cache: in-memory (ttl {}s)", config.status_ttl_secs),
    }
}

fn log_storage_config(config: &StorageArgs) {
    match config.storage {
        StorageBackend::S3 => {
            info!(
                "  S3 bucket: {}",
                config.s3_bucket.as_deref().unwrap_or_default()
            );
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", config.s3_region);
        }
        StorageBackend::Local => {
            info!("  Local storage: {}", config.local_root.display());
        }
    }
}

fn log_database_config(config: &DatabaseArgs) {
    if config.database_url.is_some() {
        info!("  Database: postgres (max {} connections)", config.db_max_connections);
    } else {
        warn!("  Database: in-memory, images are lost on exit");
    }
}

fn log_pool_config(config: &PoolArgs) {
    info!(
        "  Workers: {} (queue {}), JPEG quality {}",
        config.workers,
        config.pool_config().queue_capacity(),
        config.jpeg_quality
    );
}
