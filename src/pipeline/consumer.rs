use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::{Delivery, MessageSource};
use crate::error::BrokerError;

/// Pause after a transient read error before trying again.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Counters reported when the reader stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub forwarded: usize,
    pub read_errors: usize,
}

/// Single reader: broker → bounded queue.
///
/// Stops on cancellation, when the broker stream ends, or when every worker
/// is gone. A delivery read but not yet forwarded at cancellation is left
/// unacknowledged, so the broker redelivers it. On exit the queue is closed,
/// letting workers drain what was already forwarded. The source stays open
/// so those workers can still acknowledge; the pool releases it.
pub async fn run_reader(
    source: Arc<dyn MessageSource>,
    queue: Sender<Delivery>,
    cancel: CancellationToken,
) -> ReaderStats {
    let mut stats = ReaderStats::default();
    info!(capacity = ?queue.capacity(), "Reader started");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Reader cancelled");
                break;
            }
            result = source.recv() => match result {
                Ok(delivery) => delivery,
                Err(BrokerError::Closed) => {
                    info!("Message stream closed");
                    break;
                }
                Err(e) => {
                    stats.read_errors += 1;
                    error!(error = %e, "Failed to read message");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(READ_RETRY_DELAY) => continue,
                    }
                }
            }
        };

        let offset = delivery.offset;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(offset, "Reader cancelled with an unforwarded message, leaving it for redelivery");
                break;
            }
            sent = queue.send(delivery) => {
                if sent.is_err() {
                    error!(offset, "Job queue closed, stopping reader");
                    break;
                }
                stats.forwarded += 1;
            }
        }
    }

    queue.close();
    info!(forwarded = stats.forwarded, read_errors = stats.read_errors, "Reader stopped");
    stats
}
