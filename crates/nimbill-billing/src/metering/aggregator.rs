//! Usage reconciliation with DashMap
//!
//! Transformers run once per window and may be re-run when telemetry is
//! re-delivered. The reconciler folds their records into one
//! `WeightSegments` per (tenant, resource, service) so repeated or
//! overlapping records never double-bill, then reads per-window usage back
//! out of the merged coverage.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use nimbill_common::{
    NimbillError, PricingError, RateUnit, Result, ServiceId, TimeLabel, UsageRecord,
    WeightSegments, DEFAULT_DEVIATION_SECS, DEFAULT_WEIGHT,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Reconciliation key for grouping usage
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReconcileKey {
    pub tenant_id: String,
    /// Empty when the record carries no resource
    pub resource_id: String,
    pub service: ServiceId,
}

impl ReconcileKey {
    pub fn new(
        tenant_id: impl Into<String>,
        resource_id: impl Into<String>,
        service: impl Into<ServiceId>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_id: resource_id.into(),
            service: service.into(),
        }
    }

    /// Create a key from a usage record
    pub fn from_record(tenant_id: &str, record: &UsageRecord) -> Self {
        Self::new(
            tenant_id,
            record.resource_id.clone().unwrap_or_default(),
            record.service.clone(),
        )
    }

    /// Stable textual form, used for cache key hashing
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.tenant_id, self.resource_id, self.service)
    }
}

/// Merged coverage for one key
#[derive(Debug, Clone)]
struct Coverage {
    segments: WeightSegments,
    unit: RateUnit,
    resource_name: Option<String>,
}

impl Coverage {
    fn new(deviation: u64, unit: RateUnit) -> Self {
        Self {
            segments: WeightSegments::new(deviation),
            unit,
            resource_name: None,
        }
    }
}

/// Usage reconciler
pub struct UsageReconciler {
    /// Merge tolerance in seconds
    deviation: u64,
    coverage: Arc<DashMap<ReconcileKey, Coverage>>,
}

impl UsageReconciler {
    pub fn new(deviation: u64) -> Self {
        Self {
            deviation,
            coverage: Arc::new(DashMap::new()),
        }
    }

    pub fn deviation(&self) -> u64 {
        self.deviation
    }

    /// Fold one record into its key's coverage.
    ///
    /// Time-based usage covers `[start, end - 1]` seconds with weight 1;
    /// quantity usage carries its exact volume packed into the weight.
    pub fn record(&self, tenant_id: &str, usage: &UsageRecord, unit: RateUnit) -> Result<()> {
        let start = usage.start.timestamp();
        let end = usage.end.timestamp() - 1;
        if end < start {
            debug!(service = %usage.service, "Skipping zero-length usage record");
            return Ok(());
        }

        let weight = match unit {
            RateUnit::Time => DEFAULT_WEIGHT,
            RateUnit::Quantity => pack_volume(usage.volume)?,
        };

        let key = ReconcileKey::from_record(tenant_id, usage);
        let mut coverage = self
            .coverage
            .entry(key)
            .or_insert_with(|| Coverage::new(self.deviation, unit));
        if usage.resource_name.is_some() {
            coverage.resource_name = usage.resource_name.clone();
        }
        coverage.segments.add_range(start, end, weight)?;
        Ok(())
    }

    /// Reconciled usage of a tenant inside `window`, one record per clipped segment
    #[instrument(skip(self, window), fields(window = %window))]
    pub fn reconciled(&self, tenant_id: &str, window: &TimeLabel) -> Result<Vec<UsageRecord>> {
        let lo = window.start().timestamp();
        let hi = window.end().timestamp() - 1;

        let mut records = Vec::new();
        for entry in self.coverage.iter() {
            let (key, coverage) = entry.pair();
            if key.tenant_id != tenant_id {
                continue;
            }

            for ((start, end), weight) in coverage.segments.in_range(lo, hi) {
                let volume = match coverage.unit {
                    RateUnit::Time => Decimal::from(end - start + 1),
                    RateUnit::Quantity => unpack_volume(weight)?,
                };
                let mut record =
                    UsageRecord::new(key.service.clone(), to_datetime(start)?, to_datetime(end + 1)?, volume);
                if !key.resource_id.is_empty() {
                    record = record.with_resource(key.resource_id.clone(), coverage.resource_name.clone());
                }
                records.push(record);
            }
        }

        records.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| a.service.cmp(&b.service))
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        debug!(tenant = tenant_id, records = records.len(), "Reconciled window");
        Ok(records)
    }

    /// Encoded coverage of a key
    pub fn snapshot(&self, key: &ReconcileKey) -> Option<String> {
        self.coverage.get(key).map(|c| c.segments.serialize_str())
    }

    /// Replace a key's coverage with a previously encoded snapshot
    pub fn restore(&self, key: ReconcileKey, encoded: &str, unit: RateUnit) {
        let segments = WeightSegments::deserialize_str(encoded, self.deviation);
        debug!(key = %key.canonical(), segments = segments.len(), "Restored coverage");
        self.coverage
            .entry(key)
            .or_insert_with(|| Coverage::new(self.deviation, unit))
            .segments = segments;
    }

    /// Keys currently tracked for a tenant
    pub fn keys(&self, tenant_id: &str) -> Vec<ReconcileKey> {
        let mut keys: Vec<_> = self
            .coverage
            .iter()
            .filter(|entry| entry.key().tenant_id == tenant_id)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop all coverage of a tenant, returning the number of keys removed
    #[instrument(skip(self))]
    pub fn drain_tenant(&self, tenant_id: &str) -> usize {
        let before = self.coverage.len();
        self.coverage.retain(|key, _| key.tenant_id != tenant_id);
        let removed = before.saturating_sub(self.coverage.len());
        info!(removed, "Drained tenant coverage");
        removed
    }

    pub fn len(&self) -> usize {
        self.coverage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coverage.is_empty()
    }
}

impl Default for UsageReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_DEVIATION_SECS)
    }
}

/// Bits of a packed weight holding the decimal scale (scale <= 28)
const SCALE_BITS: u32 = 5;

/// Encode a quantity as `mantissa << 5 | scale` so equal volumes share a
/// weight and the value survives `serialize_str` without rounding
fn pack_volume(volume: Decimal) -> Result<i64> {
    let volume = volume.normalize();
    let mantissa = i64::try_from(volume.mantissa()).map_err(|_| PricingError::Overflow)?;
    mantissa
        .checked_mul(1 << SCALE_BITS)
        .and_then(|w| w.checked_add(i64::from(volume.scale())))
        .ok_or_else(|| PricingError::Overflow.into())
}

fn unpack_volume(weight: i64) -> Result<Decimal> {
    let scale = weight.rem_euclid(1 << SCALE_BITS) as u32;
    let mantissa = weight.div_euclid(1 << SCALE_BITS);
    Decimal::try_new(mantissa, scale)
        .map_err(|e| NimbillError::Internal(format!("Corrupt quantity weight {}: {}", weight, e)))
}

fn to_datetime(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| NimbillError::Internal(format!("Timestamp out of range: {}", secs)))
}
