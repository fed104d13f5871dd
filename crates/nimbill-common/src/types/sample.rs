//! Telemetry samples
//!
//! A sample is one observation delivered by the telemetry source. Values
//! may be missing and metadata is free-form JSON, so accessors here are
//! lenient: strings and numbers are both accepted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// One telemetry observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Observation instant
    pub timestamp: DateTime<Utc>,
    /// Observed value, `None` when the source reported null
    #[serde(default)]
    pub value: Option<Decimal>,
    /// Resource metadata at observation time
    #[serde(default)]
    pub metadata: Value,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: Option<Decimal>) -> Self {
        Self {
            timestamp,
            value,
            metadata: Value::Null,
        }
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Value with nulls counted as zero
    pub fn value_or_zero(&self) -> Decimal {
        self.value.unwrap_or(Decimal::ZERO)
    }

    /// First present metadata key rendered as a string
    pub fn meta_str(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match self.metadata.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// First present metadata key parsed as a decimal
    pub fn meta_decimal(&self, keys: &[&str]) -> Option<Decimal> {
        keys.iter().find_map(|key| match self.metadata.get(*key)? {
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        })
    }
}
