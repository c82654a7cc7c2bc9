use std::collections::BTreeSet;

use serde_json::Value;

use super::{NormalizeError, Normalizer};
use crate::metric::Metrics;

/// Noisy runtime fields Go's expvar publishes on every process.
pub const DEFAULT_EXCLUSIONS: &[&str] = &["cmdline", "memstats"];

/// Normalizer for expvar-style JSON object dumps.
///
/// Top-level keys listed in the exclusion set are dropped from the output.
#[derive(Debug, Clone, Default)]
pub struct Expvar {
    excluded: BTreeSet<String>,
}

impl Expvar {
    /// Keep every key.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exclusions<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }
}

impl Normalizer for Expvar {
    fn normalize(&self, raw: &[u8]) -> Result<Metrics, NormalizeError> {
        let mut map = match serde_json::from_slice(raw)? {
            Value::Object(map) => map,
            other => {
                return Err(NormalizeError::NotAnObject {
                    found: json_kind(&other),
                });
            }
        };

        for key in &self.excluded {
            map.remove(key);
        }

        Ok(Metrics::Map(map))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
