//! Rating engine
//!
//! Turns usage records into money:
//! - Resolve the tariff in force when the usage started
//! - Quantize volume to billable units (`ceil(volume / rate)`)
//! - Multiply by the unit price and subtotal per tariff

use chrono::{DateTime, Utc};
use nimbill_common::{
    NimbillError, PricingError, RateUnit, Result, ServiceId, TariffAssignment, UsageRecord,
    DEFAULT_TARIFF_ID,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::catalog::ServiceCatalog;

/// One rated usage line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatedUsage {
    pub record: UsageRecord,
    /// Quantized volume
    pub billable_units: Decimal,
    /// Price per billable unit
    pub unit_price: Decimal,
    /// `billable_units × unit_price`
    pub cost: Decimal,
    /// Priced from an auto-provisioned entry
    pub needs_review: bool,
}

/// Lines rated under one tariff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffSubtotal {
    pub tariff_id: String,
    pub lines: Vec<RatedUsage>,
    pub subtotal: Decimal,
}

/// Rated billing period for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Ordered by first usage
    pub subtotals: Vec<TariffSubtotal>,
    /// Sum of all subtotals
    pub total: Decimal,
    /// Services priced at zero pending operator review
    pub flagged_services: Vec<ServiceId>,
    pub generated_at: DateTime<Utc>,
}

impl Invoice {
    /// Subtotal for a tariff, if any usage was rated under it
    pub fn subtotal(&self, tariff_id: &str) -> Option<&TariffSubtotal> {
        self.subtotals.iter().find(|s| s.tariff_id == tariff_id)
    }

    pub fn line_count(&self) -> usize {
        self.subtotals.iter().map(|s| s.lines.len()).sum()
    }
}

/// Rates usage records against the catalog
pub struct RatingEngine {
    catalog: Arc<dyn ServiceCatalog>,
    default_tariff: String,
}

impl RatingEngine {
    pub fn new(catalog: Arc<dyn ServiceCatalog>) -> Self {
        Self {
            catalog,
            default_tariff: DEFAULT_TARIFF_ID.to_string(),
        }
    }

    /// Tariff used when no assignment covers a record
    pub fn with_default_tariff(mut self, tariff_id: impl Into<String>) -> Self {
        self.default_tariff = tariff_id.into();
        self
    }

    /// Rate one record under `tariff_id`, provisioning an unpriced service with `unit`
    pub fn rate_record(&self, tariff_id: &str, record: &UsageRecord, unit: RateUnit) -> Result<RatedUsage> {
        let entry = self.catalog.price_or_provision(tariff_id, &record.service, unit)?;

        let billable_units = entry.billable_units(record.volume);
        let cost = entry.cost(record.volume)?;

        Ok(RatedUsage {
            record: record.clone(),
            billable_units,
            unit_price: entry.price,
            cost,
            needs_review: entry.needs_review,
        })
    }

    /// Rate a tenant's records for a period, grouped by tariff assignment.
    ///
    /// Unpriced services are provisioned as quantity-billed.
    pub fn rate(
        &self,
        tenant_id: &str,
        period: (DateTime<Utc>, DateTime<Utc>),
        records: &[UsageRecord],
        assignments: &[TariffAssignment],
    ) -> Result<Invoice> {
        self.rate_with_units(tenant_id, period, records, assignments, |_| RateUnit::Quantity)
    }

    /// Like [`RatingEngine::rate`], with `unit_of` giving each record's billing unit
    #[instrument(skip(self, records, assignments, unit_of), fields(records = records.len()))]
    pub fn rate_with_units(
        &self,
        tenant_id: &str,
        period: (DateTime<Utc>, DateTime<Utc>),
        records: &[UsageRecord],
        assignments: &[TariffAssignment],
        unit_of: impl Fn(&UsageRecord) -> RateUnit,
    ) -> Result<Invoice> {
        let mut subtotals: Vec<TariffSubtotal> = Vec::new();
        let mut flagged = BTreeSet::new();

        let mut ordered: Vec<&UsageRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.start);

        for record in ordered {
            let unit = unit_of(record);
            let mut tariff_id = self.tariff_for(record.start, assignments);
            let line = match self.rate_record(tariff_id, record, unit) {
                Err(NimbillError::Pricing(PricingError::UnknownTariff { tariff }))
                    if tariff != self.default_tariff =>
                {
                    warn!(%tariff, fallback = %self.default_tariff, "Assigned tariff missing from catalog");
                    tariff_id = self.default_tariff.as_str();
                    self.rate_record(tariff_id, record, unit)?
                }
                other => other?,
            };
            if line.needs_review {
                flagged.insert(record.service.clone());
            }

            let subtotal = match subtotals.iter_mut().position(|s| s.tariff_id == tariff_id) {
                Some(idx) => &mut subtotals[idx],
                None => {
                    subtotals.push(TariffSubtotal {
                        tariff_id: tariff_id.to_string(),
                        lines: Vec::new(),
                        subtotal: Decimal::ZERO,
                    });
                    let last = subtotals.len() - 1;
                    &mut subtotals[last]
                }
            };
            subtotal.subtotal += line.cost;
            subtotal.lines.push(line);
        }

        let total: Decimal = subtotals.iter().map(|s| s.subtotal).sum();
        debug!(tariffs = subtotals.len(), %total, "Rated period");
        if !flagged.is_empty() {
            info!(count = flagged.len(), "Services awaiting operator pricing");
        }

        Ok(Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            period_start: period.0,
            period_end: period.1,
            subtotals,
            total,
            flagged_services: flagged.into_iter().collect(),
            generated_at: Utc::now(),
        })
    }

    fn tariff_for<'a>(&'a self, at: DateTime<Utc>, assignments: &'a [TariffAssignment]) -> &'a str {
        match assignments.iter().find(|a| a.covers(at)) {
            Some(assignment) => &assignment.tariff_id,
            None => {
                if !assignments.is_empty() {
                    warn!(%at, tariff = %self.default_tariff, "No tariff assignment covers usage");
                }
                &self.default_tariff
            }
        }
    }
}
