//! Error types for the relay.

use std::time::Duration;
use thiserror::Error;

/// A payload that can never become a valid relay message.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The bytes are not a MessagePack map with string keys.
    #[error("Invalid MessagePack payload: {0}")]
    Encoding(#[from] rmp_serde::decode::Error),

    /// The map was decoded but bytes remain after it.
    #[error("Unexpected {0} trailing bytes after message")]
    TrailingBytes(usize),

    /// The key set is not exactly `{method, path, data}`.
    #[error("Expected message to have keys {{method, path, data}}; got: {0}")]
    UnexpectedKeys(String),

    /// `method` is not a supported HTTP verb.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// A field has the wrong type.
    #[error("Field `{field}` must be {expected}; got: {found}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        found: String,
    },
}

/// Broker connection and consumption errors.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// A single connection attempt exceeded the connect timeout.
    #[error("Timed out connecting to broker after {0:?}")]
    ConnectTimeout(Duration),

    /// The broker closed the connection.
    #[error("Connection closed by broker: {0}")]
    ClosedByServer(String),

    /// The heartbeat monitor detected a dead connection.
    #[error("Connection closed by heartbeat monitor")]
    HeartbeatMissed,

    /// Socket-level failure.
    #[error("Broker IO error: {0}")]
    Io(String),

    /// Anything the broker reports that retrying will not fix
    /// (bad credentials, unknown vhost, channel errors).
    #[error("Broker protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Whether a fresh connection attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::ConnectTimeout(_)
            | BrokerError::ClosedByServer(_)
            | BrokerError::HeartbeatMissed
            | BrokerError::Io(_) => true,
            BrokerError::Protocol(_) => false,
        }
    }
}

/// Failure to obtain any HTTP response.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request was sent (or attempted) but no response arrived:
    /// DNS, connect, TLS, timeout, broken connection.
    #[error("Request failed: {0}")]
    Request(String),

    /// The request could not be built. Retrying cannot help.
    #[error("Cannot build request: {0}")]
    Build(String),

    /// The transport was closed before the request was issued.
    #[error("HTTP transport is closed")]
    Closed,
}

impl TransportError {
    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Request(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::Build(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Unclassified delivery failure. Never produced for ordinary API responses.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Top-level relay error.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] observability::ObservabilityError),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_broker_errors() {
        assert!(BrokerError::ConnectTimeout(Duration::from_secs(10)).is_transient());
        assert!(BrokerError::ClosedByServer("CONNECTION_FORCED".into()).is_transient());
        assert!(BrokerError::HeartbeatMissed.is_transient());
        assert!(BrokerError::Io("connection refused".into()).is_transient());
        assert!(!BrokerError::Protocol("ACCESS_REFUSED".into()).is_transient());
    }

    #[test]
    fn only_request_failures_are_retryable() {
        assert!(TransportError::Request("connection reset".into()).is_retryable());
        assert!(!TransportError::Build("relative URL without a base".into()).is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }

    #[test]
    fn unexpected_keys_display() {
        let err = DecodeError::UnexpectedKeys("{\"method\":\"POST\"}".to_string());
        assert_eq!(
            err.to_string(),
            "Expected message to have keys {method, path, data}; got: {\"method\":\"POST\"}"
        );
    }

    #[test]
    fn relay_error_wraps_broker_error() {
        let err: RelayError = BrokerError::HeartbeatMissed.into();
        assert_eq!(
            err.to_string(),
            "Broker error: Connection closed by heartbeat monitor"
        );
    }
}
