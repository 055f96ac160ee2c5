//! Message broker abstraction.
//!
//! The producer publishes `(callback id, request JSON)` pairs through a
//! [`MessagePublisher`]; the consumer reader pulls [`Delivery`] values from a
//! [`MessageSource`] and acknowledges each one once its job has reached a
//! terminal status.
//!
//! A delivery that is never acknowledged stays with the broker and is
//! redelivered to the consumer group later. That is the at-least-once
//! guarantee the pipeline relies on across shutdowns.
//!
//! # Backends
//!
//! - [`KafkaPublisher`] / [`KafkaSource`]: Kafka via librdkafka (feature `kafka`)
//! - [`MemoryBroker`]: single-process channel with ack tracking
//!
//! [`OffsetTracker`] turns out-of-order acknowledgements into a single
//! per-partition position for log-based brokers.

#[cfg(feature = "kafka")]
mod kafka;
mod memory;
mod offsets;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BrokerError;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaPublisher, KafkaSource};
pub use memory::MemoryBroker;
pub use offsets::OffsetTracker;

/// One message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Partition key; the callback id for transformation jobs.
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub partition: i32,
    pub offset: i64,
}

impl Delivery {
    /// The key as UTF-8, when present and valid.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }
}

/// Publishes keyed messages to the job topic.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one message. Returns once the broker has accepted it.
    async fn publish(&self, key: &[u8], payload: &[u8]) -> Result<(), BrokerError>;
}

/// Reads messages from the job topic.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next delivery.
    ///
    /// Returns [`BrokerError::Closed`] once the stream has ended for good.
    /// Any other error is transient. The future must be safe to drop.
    async fn recv(&self) -> Result<Delivery, BrokerError>;

    /// Mark `delivery` as fully handled so it is not redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Release the broker connection. Called once, after the last `recv`
    /// and after every worker has finished acknowledging.
    fn close(&self) {}
}
