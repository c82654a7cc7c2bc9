use std::time::Duration;

use crate::metric::InstanceMetric;
use crate::normalizer::NormalizeError;

/// Result of a whole `collect` call.
pub type Result<T> = std::result::Result<T, CollectError>;

/// Failures of a whole `collect` call.
///
/// Per-instance failures never show up here; they are recorded on the
/// instance's [`InstanceMetric`]. The cancellation variants carry the batch
/// gathered before the signal fired, already sorted by instance.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("app `{app}` does not have any routes to hit")]
    NoRoutes { app: String },

    #[error(
        "metrics collection cancelled after {} of {expected} instances reported",
        .partial.len()
    )]
    Cancelled {
        partial: Vec<InstanceMetric>,
        expected: usize,
    },

    #[error(
        "metrics collection exceeded its {deadline:?} deadline after {} of {expected} instances reported",
        .partial.len()
    )]
    DeadlineExceeded {
        deadline: Duration,
        partial: Vec<InstanceMetric>,
        expected: usize,
    },
}

impl CollectError {
    pub fn no_routes(app: impl Into<String>) -> Self {
        Self::NoRoutes { app: app.into() }
    }

    /// True for explicit cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }

    /// Results gathered before the call was interrupted.
    pub fn partial(&self) -> &[InstanceMetric] {
        match self {
            Self::NoRoutes { .. } => &[],
            Self::Cancelled { partial, .. } | Self::DeadlineExceeded { partial, .. } => partial,
        }
    }

    pub fn into_partial(self) -> Vec<InstanceMetric> {
        match self {
            Self::NoRoutes { .. } => Vec::new(),
            Self::Cancelled { partial, .. } | Self::DeadlineExceeded { partial, .. } => partial,
        }
    }
}

/// Why a single instance produced no metrics. Its text ends up in
/// [`InstanceMetric::error`].
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("failed to build request for {url}: {reason}")]
    Request { url: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed to normalize metrics: {0}")]
    Normalize(#[from] NormalizeError),
}

impl InstanceError {
    pub fn request(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Request {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by a [`Transport`](crate::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Invalid collector or transport configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl ConfigError {
    pub fn invalid_header(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
