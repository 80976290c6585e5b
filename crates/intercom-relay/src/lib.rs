//! Intercom relay: forwards queued API calls from RabbitMQ to Intercom.
//!
//! Producers publish MessagePack maps `{method, path, data}` to a durable
//! queue. The relay consumes them one at a time and issues the matching
//! REST call, retrying transient failures.
//!
//! # Core Invariants
//!
//! 1. **Ack after outcome**: a delivery is acknowledged only once its message
//!    was delivered, abandoned, or found malformed
//! 2. **One in flight**: prefetch is 1 and messages are handled in order
//! 3. **Crash-safe**: anything unacknowledged is redelivered by the broker
//! 4. **Bounded rejection**: 4xx (except 404 and 429) and two 5xx in a row
//!    drop the message instead of blocking the queue
//!
//! # Architecture
//!
//! ```text
//! RabbitMQ -> Relay -> decode -> TicketingClient -> Intercom
//!    ^                                  |
//!    |________ basic.ack <______________|
//! ```

pub mod amqp;
pub mod broker;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod message;
pub mod relay;

#[cfg(test)]
mod tests;

pub use amqp::AmqpBroker;
pub use broker::{connect_with_retry, AckingConsumer, Broker, BrokerConnection, InboundMessage};
pub use client::{build_client, MockClient, TicketingClient};
pub use config::{ApiMode, ApiSettings, BrokerSettings, RelayConfig};
pub use delivery::{DeliveryOutcome, RestClient};
pub use error::{BrokerError, DecodeError, DeliveryError, RelayError, RelayResult, TransportError};
pub use http::{HttpResponse, HttpTransport, ReqwestTransport};
pub use message::{HttpMethod, RelayMessage};
pub use relay::{Disposition, Relay};
