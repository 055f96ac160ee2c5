//! Configuration management.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `IMAGO_` prefix. Options are grouped by concern and
//! flattened into the subcommands that need them:
//!
//! | Subcommand   | HTTP | Kafka | Status | Storage | Database | Pool |
//! |--------------|------|-------|--------|---------|----------|------|
//! | `serve`      |  ✓   |   ✓   |   ✓    |         |    ✓     |      |
//! | `worker`     |      |   ✓   |   ✓    |    ✓    |    ✓     |  ✓   |
//! | `standalone` |  ✓   |       |   ✓    |    ✓    |    ✓     |  ✓   |
//!
//! `standalone` runs the API and the worker pool in one process over the
//! in-memory broker.
//!
//! # Environment Variables
//!
//! - `IMAGO_HOST` / `IMAGO_PORT` - HTTP bind address (default: 0.0.0.0:8080)
//! - `IMAGO_KAFKA_BROKERS` - Kafka bootstrap servers (default: localhost:9092)
//! - `IMAGO_KAFKA_TOPIC` - Job topic (default: image-transformations)
//! - `IMAGO_KAFKA_GROUP_ID` - Consumer group (default: image-transformer)
//! - `IMAGO_REDIS_URL` - Redis status store; in-memory when unset
//! - `IMAGO_STATUS_TTL_SECS` - Status lifetime (default: 3600)
//! - `IMAGO_STORAGE` - `s3` or `local` (default: s3)
//! - `IMAGO_S3_BUCKET` / `IMAGO_S3_ENDPOINT` / `IMAGO_S3_REGION`
//! - `IMAGO_LOCAL_ROOT` / `IMAGO_LOCAL_BASE_URL`
//! - `IMAGO_DATABASE_URL` - PostgreSQL; in-memory repository when unset
//! - `IMAGO_WORKERS` - Worker count (default: 5)
//! - `IMAGO_QUEUE_FACTOR` - Queue capacity per worker (default: 2)
//! - `IMAGO_CLEANUP_TIMEOUT_SECS` - Orphan delete deadline (default: 10)
//! - `IMAGO_JPEG_QUALITY` - JPEG output quality (default: 75)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::pipeline::{PoolConfig, DEFAULT_QUEUE_FACTOR, DEFAULT_WORKERS};
use crate::repository::DEFAULT_MAX_CONNECTIONS;
use crate::transform::{is_valid_quality, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default Kafka bootstrap servers.
pub const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";

/// Default job topic.
pub const DEFAULT_KAFKA_TOPIC: &str = "image-transformations";

/// Default consumer group.
pub const DEFAULT_KAFKA_GROUP_ID: &str = "image-transformer";

/// Default status TTL in seconds (1 hour).
pub const DEFAULT_STATUS_TTL_SECS: u64 = 3600;

/// Default orphan delete deadline in seconds.
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 10;

/// Default root for the local blob store.
pub const DEFAULT_LOCAL_ROOT: &str = "./uploads";

// =============================================================================
// CLI
// =============================================================================

/// imago-pipeline - asynchronous image transformation pipeline.
#[derive(Parser, Debug, Clone)]
#[command(name = "imago-pipeline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API: enqueue jobs and serve status polls.
    Serve(ServeConfig),

    /// Run the consumer reader and worker pool.
    Worker(WorkerConfig),

    /// Run the API and the workers in one process over an in-memory broker.
    Standalone(StandaloneConfig),
}

// =============================================================================
// Option Groups
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMAGO_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMAGO_PORT")]
    pub port: u16,

    /// Allowed CORS origins (comma-separated). Any origin when unset.
    #[arg(long, env = "IMAGO_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl HttpArgs {
    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct KafkaArgs {
    /// Kafka bootstrap servers.
    #[arg(long, default_value = DEFAULT_KAFKA_BROKERS, env = "IMAGO_KAFKA_BROKERS")]
    pub kafka_brokers: String,

    /// Topic carrying transformation jobs.
    #[arg(long, default_value = DEFAULT_KAFKA_TOPIC, env = "IMAGO_KAFKA_TOPIC")]
    pub kafka_topic: String,

    /// Consumer group shared by all workers.
    #[arg(long, default_value = DEFAULT_KAFKA_GROUP_ID, env = "IMAGO_KAFKA_GROUP_ID")]
    pub kafka_group_id: String,
}

impl KafkaArgs {
    #[cfg(feature = "kafka")]
    pub fn kafka_config(&self) -> crate::broker::KafkaConfig {
        crate::broker::KafkaConfig {
            brokers: self.kafka_brokers.clone(),
            topic: self.kafka_topic.clone(),
            group_id: self.kafka_group_id.clone(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.kafka_brokers.trim().is_empty() {
            return Err("kafka_brokers must not be empty".to_string());
        }
        if self.kafka_topic.trim().is_empty() {
            return Err("kafka_topic must not be empty".to_string());
        }
        if self.kafka_group_id.trim().is_empty() {
            return Err("kafka_group_id must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Redis URL for the status cache. In-memory when unset.
    #[arg(long, env = "IMAGO_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Seconds a status stays readable after its last write.
    #[arg(long, default_value_t = DEFAULT_STATUS_TTL_SECS, env = "IMAGO_STATUS_TTL_SECS")]
    pub status_ttl_secs: u64,
}

impl StatusArgs {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    fn validate(&self) -> Result<(), String> {
        if self.status_ttl_secs == 0 {
            return Err("status_ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Blob storage backend.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Where image blobs live.
    #[arg(long, value_enum, default_value_t = StorageBackend::S3, env = "IMAGO_STORAGE")]
    pub storage: StorageBackend,

    /// S3 bucket holding image blobs.
    #[arg(long, env = "IMAGO_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "IMAGO_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "IMAGO_S3_REGION")]
    pub s3_region: String,

    /// Root directory of the local blob store.
    #[arg(long, default_value = DEFAULT_LOCAL_ROOT, env = "IMAGO_LOCAL_ROOT")]
    pub local_root: PathBuf,

    /// Public base URL for local blobs. `file://` URLs when unset.
    #[arg(long, env = "IMAGO_LOCAL_BASE_URL")]
    pub local_base_url: Option<String>,
}

impl StorageArgs {
    fn validate(&self) -> Result<(), String> {
        match self.storage {
            StorageBackend::S3 => {
                let bucket = self.s3_bucket.as_deref().unwrap_or("");
                if bucket.trim().is_empty() {
                    return Err(
                        "S3 bucket name is required. Set --s3-bucket or IMAGO_S3_BUCKET"
                            .to_string(),
                    );
                }
            }
            StorageBackend::Local => {
                if self.local_root.as_os_str().is_empty() {
                    return Err("local_root must not be empty".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// PostgreSQL URL. In-memory repository when unset.
    #[arg(long, env = "IMAGO_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "IMAGO_DB_MAX_CONNECTIONS")]
    pub db_max_connections: u32,

    /// Create the database tables on startup.
    #[arg(long, default_value_t = false, env = "IMAGO_APPLY_SCHEMA")]
    pub apply_schema: bool,
}

impl DatabaseArgs {
    fn validate(&self) -> Result<(), String> {
        if self.database_url.is_some() && self.db_max_connections == 0 {
            return Err("db_max_connections must be greater than 0".to_string());
        }
        if self.apply_schema && self.database_url.is_none() {
            return Err("--apply-schema requires --database-url".to_string());
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Number of concurrent workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "IMAGO_WORKERS")]
    pub workers: usize,

    /// Queue capacity per worker.
    #[arg(long, default_value_t = DEFAULT_QUEUE_FACTOR, env = "IMAGO_QUEUE_FACTOR")]
    pub queue_factor: usize,

    /// Seconds allowed for deleting an orphaned blob.
    #[arg(long, default_value_t = DEFAULT_CLEANUP_TIMEOUT_SECS, env = "IMAGO_CLEANUP_TIMEOUT_SECS")]
    pub cleanup_timeout_secs: u64,

    /// JPEG output quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "IMAGO_JPEG_QUALITY")]
    pub jpeg_quality: u8,
}

impl PoolArgs {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_factor: self.queue_factor,
        }
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.queue_factor == 0 {
            return Err("queue_factor must be greater than 0".to_string());
        }
        if self.cleanup_timeout_secs == 0 {
            return Err("cleanup_timeout_secs must be greater than 0".to_string());
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Subcommand Configs
// =============================================================================

/// Configuration for `serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub kafka: KafkaArgs,

    #[command(flatten)]
    pub status: StatusArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.http.validate()?;
        self.kafka.validate()?;
        self.status.validate()?;
        self.database.validate()
    }
}

/// Configuration for `worker`.
#[derive(Args, Debug, Clone)]
pub struct WorkerConfig {
    #[command(flatten)]
    pub kafka: KafkaArgs,

    #[command(flatten)]
    pub status: StatusArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl WorkerConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.kafka.validate()?;
        self.status.validate()?;
        self.storage.validate()?;
        self.database.validate()?;
        self.pool.validate()
    }
}

/// Configuration for `standalone`.
#[derive(Args, Debug, Clone)]
pub struct StandaloneConfig {
    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub status: StatusArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StandaloneConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.http.validate()?;
        self.status.validate()?;
        self.storage.validate()?;
        self.database.validate()?;
        self.pool.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
