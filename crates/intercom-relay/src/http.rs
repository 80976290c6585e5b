//! HTTP transport for the ticketing API.

use crate::error::TransportError;
use crate::message::HttpMethod;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::time::Duration;
use tracing::debug;

/// A complete HTTP response of any status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with no headers and an empty body.
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Body as text, for logs.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Sends one JSON request and returns whatever response comes back.
///
/// Non-2xx statuses are responses, not errors; only a missing response is a
/// [`TransportError`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: &Map<String, Value>,
    ) -> Result<HttpResponse, TransportError>;

    /// Release pooled connections. Later sends fail with [`TransportError::Closed`].
    async fn close(&self);
}

/// [`HttpTransport`] backed by a pooled reqwest client.
pub struct ReqwestTransport {
    base_url: String,
    client: Mutex<Option<Client>>,
}

impl ReqwestTransport {
    /// Build a client that sends `Authorization: Bearer <token>` and
    /// `Accept: application/json` on every request.
    ///
    /// Redirects are not followed; a 3xx is returned as the response.
    pub fn new(
        base_url: impl Into<String>,
        token: &str,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TransportError::Build(format!("invalid API token: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            client: Mutex::new(Some(client)),
        })
    }

    fn url(&self, path: &str) -> String {
        request_url(&self.base_url, path)
    }
}

/// Join a base URL and an API path with exactly one slash between them.
pub fn request_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: &Map<String, Value>,
    ) -> Result<HttpResponse, TransportError> {
        let client = self.client.lock().clone().ok_or(TransportError::Closed)?;

        let response = client
            .request(method.into(), self.url(path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                debug!(status = status.as_u16(), error = %e, "Failed to read response body");
                Vec::new()
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn close(&self) {
        if self.client.lock().take().is_some() {
            debug!("HTTP client closed");
        }
    }
}
