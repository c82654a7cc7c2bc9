//! Per-instance collection results.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::{Map, Value};

/// String-keyed mapping produced by the structured normalizers.
pub type MetricMap = Map<String, Value>;

/// Normalized metrics of one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Metrics {
    /// Response body kept verbatim.
    Raw(Bytes),
    /// Structured key/value mapping.
    Map(MetricMap),
}

impl Metrics {
    /// Key under which a raw body appears once serialized.
    pub const RAW_KEY: &'static str = "raw";

    pub fn empty() -> Self {
        Self::Map(MetricMap::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Raw(body) => body.is_empty(),
            Self::Map(map) => map.is_empty(),
        }
    }

    pub fn as_map(&self) -> Option<&MetricMap> {
        match self {
            Self::Map(map) => Some(map),
            Self::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(body) => Some(body),
            Self::Map(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }
}

impl Serialize for Metrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Map(map) => map.serialize(serializer),
            Self::Raw(body) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(Self::RAW_KEY, &String::from_utf8_lossy(body))?;
                map.end()
            }
        }
    }
}

/// Outcome of one instance: either its metrics or the reason it has none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceMetric {
    instance: usize,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<Metrics>,
}

impl InstanceMetric {
    pub fn success(instance: usize, metrics: Metrics) -> Self {
        Self {
            instance,
            error: String::new(),
            metrics: Some(metrics),
        }
    }

    pub fn failure(instance: usize, error: impl fmt::Display) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            error.push_str("unknown error");
        }
        Self {
            instance,
            error,
            metrics: None,
        }
    }

    /// Slot index of the instance in the app descriptor.
    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn error(&self) -> Option<&str> {
        (!self.error.is_empty()).then_some(self.error.as_str())
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Order a batch by instance index. Arrival order must not leak out.
pub(crate) fn sort_by_instance(metrics: &mut [InstanceMetric]) {
    metrics.sort_unstable_by_key(InstanceMetric::instance);
}
