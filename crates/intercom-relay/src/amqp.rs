//! RabbitMQ implementation of the broker traits.

use crate::broker::{AckingConsumer, Broker, BrokerConnection, InboundMessage};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::protocol::AMQPErrorKind;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deliveries the broker may push before one is acknowledged.
const PREFETCH_COUNT: u16 = 1;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::IOError(e) => BrokerError::Io(e.to_string()),
            lapin::Error::MissingHeartbeatError => BrokerError::HeartbeatMissed,
            lapin::Error::InvalidConnectionState(state) => {
                BrokerError::ClosedByServer(format!("connection is {:?}", state))
            }
            // Connection.Close from the broker, e.g. CONNECTION_FORCED on restart.
            lapin::Error::ProtocolError(e) if matches!(e.kind(), AMQPErrorKind::Hard(_)) => {
                BrokerError::ClosedByServer(e.to_string())
            }
            other => BrokerError::Protocol(other.to_string()),
        }
    }
}

/// Classify a failure to open the connection.
///
/// Before the handshake completes, the broker can only report errors by
/// closing the connection, so every protocol error counts as a server close.
fn handshake_error(err: lapin::Error) -> BrokerError {
    match err {
        lapin::Error::ProtocolError(e) => BrokerError::ClosedByServer(e.to_string()),
        other => other.into(),
    }
}

/// Connects to RabbitMQ with lapin.
#[derive(Debug, Clone, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Connection = AmqpConnection;

    async fn connect(&self, url: &str) -> BrokerResult<AmqpConnection> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(handshake_error)?;

        // Hand out the connection only once its channel is usable.
        let channel = match open_channel(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection
                    .close(REPLY_SUCCESS, "channel setup failed")
                    .await
                {
                    debug!(error = %close_err, "Failed to close half-open connection");
                }
                return Err(e);
            }
        };

        Ok(AmqpConnection {
            connection,
            channel,
        })
    }
}

async fn open_channel(connection: &Connection) -> BrokerResult<Channel> {
    let channel = connection.create_channel().await?;
    channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
        .await?;
    Ok(channel)
}

/// One AMQP connection with a single channel.
pub struct AmqpConnection {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    type Consumer = AmqpConsumer;

    async fn declare_durable_queue(&mut self, queue: &str) -> BrokerResult<()> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %queue,
            messages = declared.message_count(),
            consumers = declared.consumer_count(),
            "Declared durable queue"
        );
        Ok(())
    }

    async fn acking_consumer(&mut self, queue: &str) -> BrokerResult<AmqpConsumer> {
        let consumer_tag = format!("intercom-relay-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(queue = %queue, consumer = %consumer_tag, "Started consumer");

        Ok(AmqpConsumer {
            channel: self.channel.clone(),
            consumer,
        })
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.connection
            .close(REPLY_SUCCESS, "intercom-relay shutting down")
            .await?;
        Ok(())
    }
}

/// Manual-ack consumer over one channel.
pub struct AmqpConsumer {
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl AckingConsumer for AmqpConsumer {
    async fn recv(&mut self) -> BrokerResult<Option<InboundMessage>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => {
                if delivery.redelivered {
                    warn!(
                        delivery_tag = delivery.delivery_tag,
                        "Received redelivered message"
                    );
                }
                Ok(Some(InboundMessage {
                    delivery_tag: delivery.delivery_tag,
                    payload: delivery.data,
                }))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }
}
