//! Instance transport: sends one HTTP request and hands back the response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Request, Response};
use tracing::trace;

use crate::config::HttpTransportConfig;
use crate::error::{ConfigError, TransportError};

/// Executes instance requests.
///
/// One transport is shared by every concurrent request of a `collect` call, so
/// implementations must be safe for concurrent use. Per-request timeouts are
/// the transport's business; the collector only enforces the overall
/// cancellation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// Default transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::invalid_header(name, e.to_string()))?;
            let mut header_value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::invalid_header(name, e.to_string()))?;
            if header_name == AUTHORIZATION {
                header_value.set_sensitive(true);
            }
            headers.insert(header_name, header_value);
        }

        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host);

        if config.timeout > Duration::ZERO {
            builder = builder.timeout(config.timeout);
        }

        Ok(Self {
            client: builder.build()?,
            timeout: config.timeout,
        })
    }

    /// Wrap an existing client. Its own timeout settings apply.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::ZERO,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        trace!(url = %request.url(), "Sending instance request");
        self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() && self.timeout > Duration::ZERO {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Http(e)
            }
        })
    }
}
