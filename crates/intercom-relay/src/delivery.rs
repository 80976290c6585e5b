//! Delivery of one message to the REST API, with retries.
//!
//! Every message runs through a small state machine:
//!
//! ```text
//!              +--------------------------------------------+
//!              v                                            |
//! Attempt --(transport error / first 5xx)--> WaitShort (1s) -+
//!    |    --(429)--------------------------> WaitLong (10s) -+
//!    |--(1xx-3xx or 404)--> Success
//!    +--(other 4xx or second 5xx in a row)--> GiveUp
//! ```
//!
//! "In a row" means consecutive attempts: any 429 or transport failure
//! between two 5xx responses resets the count.

use crate::error::DeliveryError;
use crate::http::HttpTransport;
use crate::message::RelayMessage;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// How a delivery ended. Every variant means the message is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The API answered 1xx-3xx.
    Delivered { status: u16 },
    /// The API answered 404. The target is gone, so there is nothing to retry.
    NotFound,
    /// The API rejected the request and the message was dropped.
    Abandoned { status: u16 },
    /// The mock client logged the message instead of sending it.
    Mocked,
}

impl DeliveryOutcome {
    /// Whether the API accepted the message (or a mock stood in for it).
    pub fn is_success(&self) -> bool {
        !matches!(self, DeliveryOutcome::Abandoned { .. })
    }
}

/// What one API response means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Accepted,
    NotFound,
    RateLimited,
    ServerError,
    Rejected,
}

/// Classify a status. A 5xx right after another 5xx is [`ResponseClass::Rejected`].
pub fn classify(status: StatusCode, previous_was_server_error: bool) -> ResponseClass {
    match status.as_u16() {
        429 => ResponseClass::RateLimited,
        404 => ResponseClass::NotFound,
        code if code >= 500 && !previous_was_server_error => ResponseClass::ServerError,
        code if code >= 400 => ResponseClass::Rejected,
        _ => ResponseClass::Accepted,
    }
}

#[derive(Debug)]
enum State {
    Attempt,
    WaitShort,
    WaitLong,
    Success(DeliveryOutcome),
    GiveUp { status: u16 },
}

/// Delivers messages over an [`HttpTransport`], retrying per the state machine.
pub struct RestClient<T> {
    transport: T,
    retry_delay: Duration,
    rate_limit_delay: Duration,
}

impl<T: HttpTransport> RestClient<T> {
    pub fn new(transport: T, retry_delay: Duration, rate_limit_delay: Duration) -> Self {
        Self {
            transport,
            retry_delay,
            rate_limit_delay,
        }
    }

    /// Deliver one message until it succeeds or is abandoned.
    ///
    /// Transport failures and rate limiting retry without bound. Returns
    /// `Err` only for failures that retrying cannot fix.
    pub async fn send(&self, message: &RelayMessage) -> Result<DeliveryOutcome, DeliveryError> {
        // Message data may hold personal details; log only the route.
        info!(method = %message.method(), path = %message.path(), "Relaying message");

        let mut last_was_server_error = false;
        let mut attempts: u32 = 0;
        let mut state = State::Attempt;

        loop {
            state = match state {
                State::Attempt => {
                    attempts += 1;
                    let result = self
                        .transport
                        .send(message.method(), message.path(), message.data())
                        .await;

                    match result {
                        Err(e) if e.is_retryable() => {
                            warn!(
                                path = %message.path(),
                                attempt = attempts,
                                error = %e,
                                "HTTP request failed; will retry"
                            );
                            last_was_server_error = false;
                            State::WaitShort
                        }
                        Err(e) => return Err(e.into()),
                        Ok(response) => {
                            let status = response.status.as_u16();
                            let class = classify(response.status, last_was_server_error);
                            last_was_server_error = class == ResponseClass::ServerError;

                            match class {
                                ResponseClass::Accepted => {
                                    State::Success(DeliveryOutcome::Delivered { status })
                                }
                                ResponseClass::NotFound => {
                                    warn!(path = %message.path(), "HTTP 404; treating this as OK");
                                    State::Success(DeliveryOutcome::NotFound)
                                }
                                ResponseClass::RateLimited => {
                                    warn!(
                                        path = %message.path(),
                                        wait_secs = self.rate_limit_delay.as_secs_f64(),
                                        "HTTP 429; waiting for the rate limit to reset"
                                    );
                                    State::WaitLong
                                }
                                ResponseClass::ServerError => {
                                    warn!(
                                        path = %message.path(),
                                        status,
                                        "Server error; retrying once"
                                    );
                                    State::WaitShort
                                }
                                ResponseClass::Rejected => {
                                    error!(
                                        method = %message.method(),
                                        path = %message.path(),
                                        status,
                                        headers = ?response.headers,
                                        body = %response.body_text(),
                                        "HTTP error; giving up on message. Please investigate"
                                    );
                                    State::GiveUp { status }
                                }
                            }
                        }
                    }
                }
                State::WaitShort => {
                    sleep(self.retry_delay).await;
                    State::Attempt
                }
                State::WaitLong => {
                    sleep(self.rate_limit_delay).await;
                    State::Attempt
                }
                State::Success(outcome) => return Ok(outcome),
                State::GiveUp { status } => return Ok(DeliveryOutcome::Abandoned { status }),
            };
        }
    }

    /// Close the underlying transport.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn success_statuses() {
        for code in [100, 200, 201, 202, 204, 301, 302, 304] {
            assert_eq!(classify(status(code), false), ResponseClass::Accepted);
            assert_eq!(classify(status(code), true), ResponseClass::Accepted);
        }
    }

    #[test]
    fn not_found_is_its_own_class() {
        assert_eq!(classify(status(404), false), ResponseClass::NotFound);
        assert_eq!(classify(status(404), true), ResponseClass::NotFound);
    }

    #[test]
    fn rate_limit_ignores_previous_server_error() {
        assert_eq!(classify(status(429), false), ResponseClass::RateLimited);
        assert_eq!(classify(status(429), true), ResponseClass::RateLimited);
    }

    #[test]
    fn second_server_error_is_rejected() {
        for code in [500, 502, 503, 504] {
            assert_eq!(classify(status(code), false), ResponseClass::ServerError);
            assert_eq!(classify(status(code), true), ResponseClass::Rejected);
        }
    }

    #[test]
    fn other_client_errors_are_rejected() {
        for code in [400, 401, 403, 409, 422] {
            assert_eq!(classify(status(code), false), ResponseClass::Rejected);
        }
    }

    #[test]
    fn only_abandoned_is_failure() {
        assert!(DeliveryOutcome::Delivered { status: 200 }.is_success());
        assert!(DeliveryOutcome::NotFound.is_success());
        assert!(DeliveryOutcome::Mocked.is_success());
        assert!(!DeliveryOutcome::Abandoned { status: 400 }.is_success());
    }
}
