use bytes::Bytes;

use super::{NormalizeError, Normalizer};
use crate::metric::Metrics;

/// Keeps the body verbatim. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl PassThrough {
    pub fn new() -> Self {
        Self
    }
}

impl Normalizer for PassThrough {
    fn normalize(&self, raw: &[u8]) -> Result<Metrics, NormalizeError> {
        Ok(Metrics::Raw(Bytes::copy_from_slice(raw)))
    }
}
