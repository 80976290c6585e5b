//! Ticketing clients: the real REST client and a logging mock.

use crate::config::{ApiMode, ApiSettings};
use crate::delivery::{DeliveryOutcome, RestClient};
use crate::error::{DeliveryError, RelayResult};
use crate::http::{HttpTransport, ReqwestTransport};
use crate::message::RelayMessage;
use async_trait::async_trait;
use tracing::{debug, info};

/// Something that can take a decoded message off the relay's hands.
#[async_trait]
pub trait TicketingClient: Send + Sync {
    /// Deliver one message. `Ok` means the relay may acknowledge it.
    async fn deliver(&self, message: &RelayMessage) -> Result<DeliveryOutcome, DeliveryError>;

    /// Release resources. Called once when the relay stops.
    async fn close(&self);
}

#[async_trait]
impl<T: HttpTransport> TicketingClient for RestClient<T> {
    async fn deliver(&self, message: &RelayMessage) -> Result<DeliveryOutcome, DeliveryError> {
        self.send(message).await
    }

    async fn close(&self) {
        RestClient::close(self).await;
    }
}

/// Logs what it would have sent. Used for local development.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockClient;

#[async_trait]
impl TicketingClient for MockClient {
    async fn deliver(&self, message: &RelayMessage) -> Result<DeliveryOutcome, DeliveryError> {
        let data = serde_json::Value::Object(message.data().clone());
        info!("(mocked) {} {} {}", message.method(), message.path(), data);
        Ok(DeliveryOutcome::Mocked)
    }

    async fn close(&self) {
        debug!("Mock client closed");
    }
}

/// Build the client selected by `settings.mode`.
pub fn build_client(settings: &ApiSettings) -> RelayResult<Box<dyn TicketingClient>> {
    match &settings.mode {
        ApiMode::Mock => {
            info!("API token is \"mock\"; messages will be logged, not sent");
            Ok(Box::new(MockClient))
        }
        ApiMode::Rest { token } => {
            let transport =
                ReqwestTransport::new(settings.base_url.clone(), token, settings.request_timeout)
                    .map_err(DeliveryError::from)?;
            Ok(Box::new(RestClient::new(
                transport,
                settings.retry_delay,
                settings.rate_limit_delay,
            )))
        }
    }
}
