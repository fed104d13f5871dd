//! # Nimbill Billing
//!
//! Metering, reconciliation and rating for cloud telemetry.
//!
//! ## Pipeline
//!
//! ```text
//! samples -> transformer (per window) -> reconciler -> rating -> invoice
//! ```
//!
//! - Transformers turn a meter's samples into usage records per window
//! - The reconciler merges records per resource so re-delivery never double-bills
//! - Rating quantizes volume to billable units: `ceil(volume / rate) × price`

pub mod billing;
pub mod config;
pub mod metering;
pub mod pricing;

use chrono::{DateTime, Utc};
use nimbill_common::{Result, Tariff, TariffAssignment, TariffEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use billing::{BillingService, PeriodRequest, UsageJob};
pub use config::{BillingConfig, CacheSettings, MeteringSettings};
pub use metering::{
    InMemorySegmentCache, ReconcileKey, SegmentCache, SegmentStore, TransformerRegistry,
    UsageReconciler,
};
pub use pricing::{InMemoryCatalog, Invoice, RatingEngine, ServiceCatalog};

/// Binary name used in logs
pub const SERVICE_NAME: &str = "nimbill";

/// Everything needed to bill one tenant's period, as read by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingInput {
    pub tenant_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(default)]
    pub tariffs: Vec<Tariff>,
    /// Profile tag -> service id
    #[serde(default)]
    pub profiles: HashMap<String, String>,
    #[serde(default)]
    pub assignments: Vec<TariffAssignment>,
    #[serde(default)]
    pub jobs: Vec<UsageJob>,
}

impl BillingInput {
    /// Catalog seeded with the input's tariffs and profiles
    pub fn catalog(&self) -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        for tariff in &self.tariffs {
            catalog.insert_tariff(tariff.clone());
        }
        self.profiles
            .iter()
            .fold(catalog, |c, (profile, service)| c.with_profile(profile.clone(), service.clone()))
    }

    /// Reject tariff entries that bypassed [`TariffEntry::new`] during deserialization
    pub fn validate(&self) -> Result<()> {
        for entry in self.tariffs.iter().flat_map(|t| t.entries.values()) {
            TariffEntry::new(entry.service.clone(), entry.price, entry.rate, entry.unit)?;
        }
        Ok(())
    }

    /// Split into the catalog and the period request
    pub fn into_parts(self) -> Result<(InMemoryCatalog, PeriodRequest)> {
        self.validate()?;
        let catalog = self.catalog();
        let request = PeriodRequest {
            tenant_id: self.tenant_id,
            period_start: self.period_start,
            period_end: self.period_end,
            jobs: self.jobs,
            assignments: self.assignments,
        };
        Ok((catalog, request))
    }
}
