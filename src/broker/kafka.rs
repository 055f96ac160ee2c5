use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::offsets::OffsetTracker;
use super::{Delivery, MessagePublisher, MessageSource};
use crate::error::BrokerError;

/// How long a publish may wait for broker acknowledgement.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings shared by publisher and source.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

// =============================================================================
// Publisher
// =============================================================================

/// Idempotent Kafka producer for job messages.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| {
                BrokerError::Configuration(format!("failed to create Kafka producer: {e}"))
            })?;

        info!(brokers = %config.brokers, topic = %config.topic, "Kafka publisher initialized");

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        self.producer
            .send(record, PUBLISH_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(err, _)| BrokerError::Publish(err.to_string()))
    }
}

// =============================================================================
// Source
// =============================================================================

/// Kafka consumer-group member for the job topic.
///
/// Offsets are stored explicitly through [`MessageSource::ack`] and
/// committed in the background, so only jobs that reached a terminal status
/// move the group forward. Acks arrive out of order from concurrent
/// workers; an [`OffsetTracker`] keeps the stored position below every
/// delivery still in flight.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    offsets: Mutex<OffsetTracker>,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.commit.interval.ms", "5000")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .create()
            .map_err(|e| {
                BrokerError::Configuration(format!("failed to create Kafka consumer: {e}"))
            })?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| BrokerError::Configuration(format!("failed to subscribe: {e}")))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka source initialized"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            offsets: Mutex::new(OffsetTracker::new()),
        })
    }

    fn offsets(&self) -> MutexGuard<'_, OffsetTracker> {
        self.offsets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn position_list(&self, positions: &[(i32, i64)]) -> Result<TopicPartitionList, BrokerError> {
        let mut tpl = TopicPartitionList::new();
        for &(partition, position) in positions {
            tpl.add_partition_offset(&self.topic, partition, Offset::Offset(position))
                .map_err(|e| BrokerError::Ack(e.to_string()))?;
        }
        Ok(tpl)
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn recv(&self) -> Result<Delivery, BrokerError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Receive(e.to_string()))?;

        let delivery = Delivery {
            key: msg.key().map(Bytes::copy_from_slice),
            payload: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
            partition: msg.partition(),
            offset: msg.offset(),
        };
        self.offsets().received(delivery.partition, delivery.offset);
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        // The stored offset is the next one to consume
        let Some(position) = self
            .offsets()
            .acknowledged(delivery.partition, delivery.offset)
        else {
            debug!(
                partition = delivery.partition,
                offset = delivery.offset,
                "Earlier delivery still in flight, holding offset"
            );
            return Ok(());
        };

        let tpl = self.position_list(&[(delivery.partition, position)])?;
        self.consumer
            .store_offsets(&tpl)
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    fn close(&self) {
        let (positions, in_flight) = {
            let offsets = self.offsets();
            (offsets.stored_positions(), offsets.in_flight())
        };

        if !positions.is_empty() {
            match self.position_list(&positions) {
                Ok(tpl) => {
                    if let Err(e) = self.consumer.commit(&tpl, CommitMode::Sync) {
                        warn!(error = %e, "Failed to commit final offsets");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to build final offsets"),
            }
        }

        self.consumer.unsubscribe();
        info!(topic = %self.topic, in_flight, "Kafka source closed");
    }
}
