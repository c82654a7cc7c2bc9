use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::Transport;

/// Path hit on every instance unless configured otherwise.
pub const DEFAULT_METRICS_PATH: &str = "/debug/metrics";

/// Per-request timeout of the default transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_USER_AGENT: &str = concat!("app-metrics/", env!("CARGO_PKG_VERSION"));

/// What to do with a body the normalizer rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NormalizeFailurePolicy {
    /// Record the normalization error on the instance (default).
    #[default]
    Error,
    /// Keep the unparsed body as the instance's metrics.
    RawFallback,
}

/// Configurable options for the collector
#[derive(Clone)]
pub struct CollectorConfig {
    /// Path of the metrics endpoint, always starting with `/`
    pub metrics_path: String,

    /// Transport shared by every request; `None` builds an [`HttpTransport`](crate::HttpTransport)
    /// from [`HttpTransportConfig::default`]
    pub transport: Option<Arc<dyn Transport>>,

    /// Behaviour when the normalizer rejects a body
    pub on_normalize_error: NormalizeFailurePolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            metrics_path: DEFAULT_METRICS_PATH.to_owned(),
            transport: None,
            on_normalize_error: NormalizeFailurePolicy::default(),
        }
    }
}

impl fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("metrics_path", &self.metrics_path)
            .field(
                "transport",
                &if self.transport.is_some() {
                    "custom"
                } else {
                    "default"
                },
            )
            .field("on_normalize_error", &self.on_normalize_error)
            .finish()
    }
}

impl CollectorConfig {
    pub fn with_metrics_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.metrics_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_normalize_failure_policy(mut self, policy: NormalizeFailurePolicy) -> Self {
        self.on_normalize_error = policy;
        self
    }
}

/// Options of the default `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Overall timeout of one request, body included. Zero disables it.
    pub timeout: Duration,

    /// Time allowed to establish the connection
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request, e.g. the access token
    pub headers: Vec<(String, String)>,

    /// Maximum idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Vec::new(),
            pool_max_idle_per_host: 16,
        }
    }
}

impl HttpTransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send `token` verbatim as the `Authorization` header.
    pub fn with_authorization(self, token: impl Into<String>) -> Self {
        self.with_header(reqwest::header::AUTHORIZATION.as_str(), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_config_default() {
        let config = CollectorConfig::default();
        assert_eq!(config.metrics_path, "/debug/metrics");
        assert!(config.transport.is_none());
        assert_eq!(config.on_normalize_error, NormalizeFailurePolicy::Error);
    }

    #[test]
    fn test_metrics_path_gets_leading_slash() {
        let config = CollectorConfig::default().with_metrics_path("metrics");
        assert_eq!(config.metrics_path, "/metrics");

        let config = CollectorConfig::default().with_metrics_path("/debug/vars");
        assert_eq!(config.metrics_path, "/debug/vars");
    }

    #[test]
    fn test_transport_config_default_timeout() {
        let config = HttpTransportConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_with_authorization() {
        let config = HttpTransportConfig::default().with_authorization("bearer abc");
        assert_eq!(
            config.headers,
            vec![("authorization".to_string(), "bearer abc".to_string())]
        );
    }
}
