//! Samples (spec §3). Fields are orthogonal to labels: they carry
//! high-cardinality per-sample dimensions and never affect series identity.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
    pub fields: BTreeMap<String, String>,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(
        timestamp_ms: i64,
        value: f64,
        fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            timestamp_ms,
            value,
            fields,
        }
    }
}
