//! App metrics engine: per-instance diagnostics collection for scaled-out apps.
//!
//! An app running several instances behind one load balancer exposes a metrics
//! endpoint on every instance. This crate hits that endpoint once per running
//! instance, pinning each request to its instance with the
//! `X-CF-APP-INSTANCE` routing header, and merges the answers into one report
//! ordered by instance index.
//!
//! ## Core Types
//!
//! - [`ApplicationDescriptor`] - The app as described by the directory service
//! - [`Collector`] - Fans out one request per running instance and gathers results
//! - [`InstanceMetric`] - One instance's outcome: normalized metrics or an error
//! - [`CollectError`] - Whole-call failures (no routes, cancellation, deadline)
//!
//! ## Capabilities
//!
//! - [`Transport`] - Sends one HTTP request; [`HttpTransport`] wraps `reqwest`
//! - [`Normalizer`] - Turns a response body into a key/value mapping
//!
//! ## Normalizers
//!
//! - [`PassThrough`] - Keeps the body verbatim
//! - [`Expvar`] - JSON object dumps, with optional key exclusions
//! - [`Prometheus`] - Text exposition format, grouped by metric family

pub mod collector;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod metric;
pub mod normalizer;
pub mod transport;

pub use collector::{Collector, INSTANCE_HEADER};
pub use config::{
    CollectorConfig, DEFAULT_METRICS_PATH, DEFAULT_REQUEST_TIMEOUT, HttpTransportConfig,
    NormalizeFailurePolicy,
};
pub use descriptor::{ApplicationDescriptor, Domain, InstanceState, Route};
pub use error::{CollectError, ConfigError, InstanceError, Result, TransportError};
pub use metric::{InstanceMetric, MetricMap, Metrics};
pub use normalizer::{
    Expvar, NormalizeError, Normalizer, NormalizerKind, PassThrough, Prometheus,
};
pub use transport::{HttpTransport, Transport};
