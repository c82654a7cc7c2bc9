//! Format normalizers: turn a raw metrics body into a uniform mapping.
//!
//! The collector never looks at the wire format. Supporting another format
//! means adding a [`Normalizer`] implementation.

mod expvar;
mod passthrough;
mod prometheus;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::metric::Metrics;

pub use expvar::{DEFAULT_EXCLUSIONS, Expvar};
pub use passthrough::PassThrough;
pub use prometheus::{Family, MetricType, Prometheus, Series};

/// Converts a response body into normalized metrics.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &[u8]) -> Result<Metrics, NormalizeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object at the top level, found {found}")]
    NotAnObject { found: &'static str },

    #[error("metrics body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("text format parsing error in line {line}: {reason}")]
    Exposition { line: usize, reason: String },
}

impl NormalizeError {
    pub fn exposition(line: usize, reason: impl Into<String>) -> Self {
        Self::Exposition {
            line,
            reason: reason.into(),
        }
    }

    /// Output the failing normalizer still hands back.
    ///
    /// A rejected exposition yields an empty mapping while a rejected JSON
    /// document yields nothing at all.
    pub fn output(&self) -> Option<Metrics> {
        match self {
            Self::Exposition { .. } | Self::InvalidUtf8(_) => Some(Metrics::empty()),
            Self::Json(_) | Self::NotAnObject { .. } => None,
        }
    }
}

/// Selectable wire formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum NormalizerKind {
    /// Keep the body as-is
    Raw,
    /// JSON object dump (Go expvar style)
    #[default]
    Expvar,
    /// Prometheus text exposition format
    Prometheus,
}

impl NormalizerKind {
    /// Build the normalizer. `exclusions` only applies to [`NormalizerKind::Expvar`].
    pub fn build<I, S>(self, exclusions: I) -> Arc<dyn Normalizer>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            Self::Raw => Arc::new(PassThrough::new()),
            Self::Expvar => Arc::new(Expvar::with_exclusions(exclusions)),
            Self::Prometheus => Arc::new(Prometheus::new()),
        }
    }
}
