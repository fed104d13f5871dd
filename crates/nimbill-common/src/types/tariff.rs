//! Tariff types - Cost = ceil(Volume / Rate) × Price
//!
//! A tariff maps every billable service to:
//! - Price: money per billable unit
//! - Rate: raw volume units per billable unit (3600 seconds per hour, 1 GB per GB, ...)
//!
//! Partial units are always rounded up so a partial hour is billed as an hour.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PricingError, Result};
use crate::types::usage::ServiceId;

/// Whether a service is billed on elapsed time or on a measured quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    /// Volume is seconds of coverage
    Time,
    /// Volume is a quantity (GB, bytes, count) per window
    Quantity,
}

impl Default for RateUnit {
    fn default() -> Self {
        RateUnit::Quantity
    }
}

/// Billing parameters for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffEntry {
    /// Service identifier
    pub service: ServiceId,
    /// Price per billable unit
    pub price: Decimal,
    /// Raw units per billable unit (>= 1)
    pub rate: Decimal,
    /// Unit kind
    #[serde(default)]
    pub unit: RateUnit,
    /// Set for services provisioned automatically from telemetry
    #[serde(default)]
    pub needs_review: bool,
}

impl TariffEntry {
    /// Create a validated entry
    pub fn new(
        service: impl Into<ServiceId>,
        price: Decimal,
        rate: Decimal,
        unit: RateUnit,
    ) -> Result<Self> {
        let service = service.into();
        if rate < Decimal::ONE {
            return Err(PricingError::InvalidRate {
                service,
                rate: rate.to_string(),
            }
            .into());
        }
        Ok(Self {
            service,
            price,
            rate,
            unit,
            needs_review: false,
        })
    }

    /// Zero-priced placeholder for a service first seen in telemetry
    pub fn provisional(service: impl Into<ServiceId>, unit: RateUnit) -> Self {
        Self {
            service: service.into(),
            price: Decimal::ZERO,
            rate: Decimal::ONE,
            unit,
            needs_review: true,
        }
    }

    /// Quantize raw volume to billable units, never under-billing a partial unit
    pub fn billable_units(&self, volume: Decimal) -> Decimal {
        if self.rate > Decimal::ONE {
            (volume / self.rate).ceil()
        } else {
            volume
        }
    }

    /// Money owed for `volume`
    pub fn cost(&self, volume: Decimal) -> Result<Decimal> {
        self.billable_units(volume)
            .checked_mul(self.price)
            .ok_or_else(|| PricingError::Overflow.into())
    }
}

/// A named price table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tariff {
    /// Tariff identifier
    pub id: String,
    /// Entries by service
    pub entries: HashMap<ServiceId, TariffEntry>,
}

impl Tariff {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: HashMap::new(),
        }
    }

    /// Add an entry
    pub fn with_entry(mut self, entry: TariffEntry) -> Self {
        self.entries.insert(entry.service.clone(), entry);
        self
    }

    pub fn get(&self, service: &str) -> Option<&TariffEntry> {
        self.entries.get(service)
    }
}

/// Period during which a tariff applies to a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffAssignment {
    pub tariff_id: String,
    /// Inclusive
    pub effective_from: DateTime<Utc>,
    /// Exclusive, open-ended when `None`
    pub effective_until: Option<DateTime<Utc>>,
}

impl TariffAssignment {
    pub fn new(tariff_id: impl Into<String>, effective_from: DateTime<Utc>) -> Self {
        Self {
            tariff_id: tariff_id.into(),
            effective_from,
            effective_until: None,
        }
    }

    /// Close the assignment at `until`
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.effective_until = Some(until);
        self
    }

    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        t >= self.effective_from && self.effective_until.map_or(true, |until| t < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_hourly_quantization_rounds_up() {
        let entry = TariffEntry::new("m1.small", dec!(0.05), dec!(3600), RateUnit::Time).unwrap();

        assert_eq!(entry.billable_units(dec!(3600)), dec!(1));
        assert_eq!(entry.billable_units(dec!(3601)), dec!(2));
        assert_eq!(entry.billable_units(dec!(1)), dec!(1));
        assert_eq!(entry.billable_units(dec!(0)), dec!(0));
        assert_eq!(entry.cost(dec!(5400)).unwrap(), dec!(0.10));
    }

    #[test]
    fn test_unit_rate_passes_volume_through() {
        let entry = TariffEntry::new("volume.size", dec!(0.002), dec!(1), RateUnit::Quantity).unwrap();

        assert_eq!(entry.billable_units(dec!(20.5)), dec!(20.5));
        assert_eq!(entry.cost(dec!(20)).unwrap(), dec!(0.040));
    }

    #[test]
    fn test_rate_below_one_rejected() {
        assert!(TariffEntry::new("x", dec!(1), dec!(0.5), RateUnit::Quantity).is_err());
        assert!(TariffEntry::new("x", dec!(1), dec!(0), RateUnit::Quantity).is_err());
    }

    #[test]
    fn test_provisional_entry_is_free_and_flagged() {
        let entry = TariffEntry::provisional("m9.huge", RateUnit::Time);
        assert!(entry.needs_review);
        assert_eq!(entry.cost(dec!(7200)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_assignment_coverage() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let assignment = TariffAssignment::new("standard", from).until(until);

        assert!(assignment.covers(from));
        assert!(!assignment.covers(until));
        assert!(TariffAssignment::new("standard", from).covers(until));
    }
}
