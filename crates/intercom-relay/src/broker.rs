//! Broker abstraction and connection retry.
//!
//! The relay only needs three things from a broker: open a connection,
//! declare a durable queue, and consume it with explicit acknowledgments.
//! [`crate::amqp`] implements these traits on top of RabbitMQ.

use crate::config::BrokerSettings;
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// A payload received from the broker, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker-assigned tag used to acknowledge this delivery.
    pub delivery_tag: u64,
    /// Raw message body.
    pub payload: Vec<u8>,
}

/// Opens broker connections.
#[async_trait]
pub trait Broker: Send + Sync {
    type Connection: BrokerConnection;

    /// Make a single connection attempt. Callers bound it with a timeout.
    async fn connect(&self, url: &str) -> BrokerResult<Self::Connection>;
}

/// A live broker session.
#[async_trait]
pub trait BrokerConnection: Send {
    type Consumer: AckingConsumer;

    /// Declare `queue` as durable. Succeeds if it already exists.
    async fn declare_durable_queue(&mut self, queue: &str) -> BrokerResult<()>;

    /// Start consuming `queue` with manual acknowledgments.
    async fn acking_consumer(&mut self, queue: &str) -> BrokerResult<Self::Consumer>;

    /// Close the session. Unacknowledged deliveries return to the queue.
    async fn close(&mut self) -> BrokerResult<()>;
}

/// Yields deliveries one at a time and acknowledges them on request.
#[async_trait]
pub trait AckingConsumer: Send {
    /// Wait for the next delivery. `None` means the broker cancelled the consumer.
    async fn recv(&mut self) -> BrokerResult<Option<InboundMessage>>;

    /// Acknowledge a delivery so the broker never redelivers it.
    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()>;
}

/// Connect to the broker, retrying transient failures forever.
///
/// Each attempt is bounded by `settings.connect_timeout`; an attempt that
/// times out counts as transient. Non-transient errors are returned at once.
pub async fn connect_with_retry<B: Broker>(
    broker: &B,
    settings: &BrokerSettings,
) -> BrokerResult<B::Connection> {
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;

        // A timed-out attempt is dropped; lapin's io loop releases its socket.
        let result = match timeout(settings.connect_timeout, broker.connect(&settings.url)).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerError::ConnectTimeout(settings.connect_timeout)),
        };

        match result {
            Ok(connection) => {
                info!(attempt, "Connected to broker");
                return Ok(connection);
            }
            Err(e) if e.is_transient() => {
                warn!(
                    attempt,
                    error = %e,
                    retry_in_ms = settings.connect_retry_delay.as_millis() as u64,
                    "Failure connecting to broker, will retry"
                );
                sleep(settings.connect_retry_delay).await;
            }
            Err(e) => {
                error!(attempt, error = %e, "Broker connection failed permanently");
                return Err(e);
            }
        }
    }
}
