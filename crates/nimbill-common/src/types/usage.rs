//! Usage records produced by transformers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Service identifier as known to the tariff catalog
pub type ServiceId = String;

/// Metered usage of one service over `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Service being billed
    pub service: ServiceId,
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
    /// Raw volume in the meter's unit
    pub volume: Decimal,
    /// Originating resource
    pub resource_id: Option<String>,
    /// Human readable resource name
    pub resource_name: Option<String>,
}

impl UsageRecord {
    pub fn new(
        service: impl Into<ServiceId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        volume: Decimal,
    ) -> Self {
        Self {
            service: service.into(),
            start,
            end,
            volume,
            resource_id: None,
            resource_name: None,
        }
    }

    /// Attach resource identity
    pub fn with_resource(mut self, resource_id: impl Into<String>, name: Option<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self.resource_name = name;
        self
    }

    /// Covered duration in whole seconds
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}
