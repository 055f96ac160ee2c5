use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use bytes::Bytes;

use super::{Delivery, MessagePublisher, MessageSource};
use crate::error::BrokerError;

/// In-process broker backed by an unbounded channel.
///
/// One instance acts as both publisher and source. Deliveries that were
/// received but never acknowledged are tracked, and [`requeue_unacked`]
/// puts them back on the channel the way a consumer-group rebalance would.
///
/// [`requeue_unacked`]: MemoryBroker::requeue_unacked
pub struct MemoryBroker {
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
    next_offset: AtomicI64,
    in_flight: Mutex<BTreeMap<i64, Delivery>>,
    acked: Mutex<Vec<i64>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            next_offset: AtomicI64::new(0),
            in_flight: Mutex::new(BTreeMap::new()),
            acked: Mutex::new(Vec::new()),
        }
    }

    /// End the stream. Queued deliveries can still be received; after that
    /// `recv` returns [`BrokerError::Closed`] and `publish` fails.
    pub fn shutdown(&self) {
        self.sender.close();
    }

    /// Deliveries published but not yet received.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Offsets acknowledged so far, in ack order.
    pub fn acked_offsets(&self) -> Vec<i64> {
        self.acked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Deliveries received but not acknowledged, by offset.
    pub fn unacked(&self) -> Vec<Delivery> {
        self.in_flight
            .lock()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Put every unacknowledged delivery back on the channel.
    ///
    /// Returns how many were requeued.
    pub fn requeue_unacked(&self) -> Result<usize, BrokerError> {
        let pending: Vec<Delivery> = match self.in_flight.lock() {
            Ok(mut map) => std::mem::take(&mut *map).into_values().collect(),
            Err(_) => return Err(BrokerError::Receive("in-flight map poisoned".into())),
        };

        let count = pending.len();
        for delivery in pending {
            self.sender
                .try_send(delivery)
                .map_err(|_| BrokerError::Closed)?;
        }
        Ok(count)
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish(&self, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        let delivery = Delivery {
            key: Some(Bytes::copy_from_slice(key)),
            payload: Bytes::copy_from_slice(payload),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        };

        self.sender
            .send(delivery)
            .await
            .map_err(|_| BrokerError::Publish("broker is shut down".into()))
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn recv(&self) -> Result<Delivery, BrokerError> {
        let delivery = self.receiver.recv().await.map_err(|_| BrokerError::Closed)?;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(delivery.offset, delivery.clone());
        }
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let removed = self
            .in_flight
            .lock()
            .map_err(|_| BrokerError::Ack("in-flight map poisoned".into()))?
            .remove(&delivery.offset);

        if removed.is_none() {
            return Err(BrokerError::Ack(format!(
                "offset {} is not in flight",
                delivery.offset
            )));
        }

        self.acked
            .lock()
            .map_err(|_| BrokerError::Ack("ack log poisoned".into()))?
            .push(delivery.offset);
        Ok(())
    }
}
