//! The consume loop: broker in, API out.
//!
//! A delivery is acknowledged only after its message is finished: delivered,
//! abandoned by the retry loop, or found to be malformed. Any other failure
//! stops the relay with the delivery still unacknowledged, so the broker
//! hands it to the next consumer.

use crate::broker::{connect_with_retry, AckingConsumer, Broker, BrokerConnection};
use crate::client::TicketingClient;
use crate::config::BrokerSettings;
use crate::delivery::DeliveryOutcome;
use crate::error::RelayResult;
use crate::message;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What the relay did with one payload. Both variants get acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delivered(DeliveryOutcome),
    /// The payload could not be decoded and was dropped.
    Malformed,
}

/// Relays messages from one durable queue to a [`TicketingClient`].
pub struct Relay<B: Broker> {
    settings: BrokerSettings,
    broker: B,
    client: Box<dyn TicketingClient>,
}

impl<B: Broker> Relay<B> {
    pub fn new(settings: BrokerSettings, broker: B, client: Box<dyn TicketingClient>) -> Self {
        Self {
            settings,
            broker,
            client,
        }
    }

    /// Run until shutdown is requested, the broker cancels the consumer, or
    /// an unrecoverable error occurs.
    ///
    /// Setting `shutdown` to `true` stops the relay; a message being delivered
    /// at that moment is left unacknowledged. The broker connection is closed
    /// before the client, on every exit path.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RelayResult<()> {
        let result = self.run_connected(&mut shutdown).await;

        self.client.close().await;
        info!("Relay stopped");

        result
    }

    async fn run_connected(&self, shutdown: &mut watch::Receiver<bool>) -> RelayResult<()> {
        info!(queue = %self.settings.queue_name, "Connecting to broker");

        let mut connection = tokio::select! {
            result = connect_with_retry(&self.broker, &self.settings) => result?,
            _ = shutdown_requested(shutdown) => {
                info!("Shutdown requested before the broker connection was established");
                return Ok(());
            }
        };

        let result = self.consume(&mut connection, shutdown).await;

        match connection.close().await {
            Ok(()) => debug!("Broker connection closed"),
            Err(e) => warn!(error = %e, "Failed to close broker connection"),
        }

        result
    }

    async fn consume(
        &self,
        connection: &mut B::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RelayResult<()> {
        let queue = self.settings.queue_name.as_str();
        connection.declare_durable_queue(queue).await?;
        let mut consumer = connection.acking_consumer(queue).await?;

        info!(queue = %queue, "Waiting for messages");

        loop {
            let more = tokio::select! {
                result = self.process_next(&mut consumer) => result?,
                _ = shutdown_requested(shutdown) => {
                    info!("Shutdown requested; stopping consumer");
                    return Ok(());
                }
            };

            if !more {
                warn!(queue = %queue, "Broker cancelled the consumer");
                return Ok(());
            }
        }
    }

    /// Handle the next delivery. Returns `false` once the consumer has ended.
    async fn process_next(
        &self,
        consumer: &mut <B::Connection as BrokerConnection>::Consumer,
    ) -> RelayResult<bool> {
        let Some(inbound) = consumer.recv().await? else {
            return Ok(false);
        };

        match self.handle_payload(&inbound.payload).await {
            Ok(disposition) => {
                consumer.ack(inbound.delivery_tag).await?;
                debug!(
                    delivery_tag = inbound.delivery_tag,
                    ?disposition,
                    "Acknowledged message"
                );
                Ok(true)
            }
            Err(e) => {
                error!(
                    delivery_tag = inbound.delivery_tag,
                    error = %e,
                    "Delivery failed; leaving message unacknowledged"
                );
                Err(e)
            }
        }
    }

    /// Decode a payload and deliver it.
    ///
    /// Malformed payloads are logged and reported as [`Disposition::Malformed`];
    /// they never reach the client.
    pub async fn handle_payload(&self, payload: &[u8]) -> RelayResult<Disposition> {
        let message = match message::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, payload_len = payload.len(), "Invalid message; dropping it");
                return Ok(Disposition::Malformed);
            }
        };

        let outcome = self.client.deliver(&message).await?;
        Ok(Disposition::Delivered(outcome))
    }
}

/// Resolve once shutdown is requested. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
