//! Sample-to-usage transformers
//!
//! Each transformer implements one metering style. All of them consume a
//! sample stream (which may start before the window) plus the window and
//! emit zero or more usage records. Transformers hold no mutable state.

pub mod gauge;
pub mod image;
pub mod network;
pub mod uptime;

pub use gauge::{GaugeMax, GaugeSum};
pub use image::FromImage;
pub use network::GaugeNetworkService;
pub use uptime::{PowerState, Uptime};

use nimbill_common::{
    RateUnit, Result, Sample, ServiceId, TelemetryError, TimeLabel, UsageRecord,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::pricing::ServiceCatalog;

/// Inputs shared by every transformer invocation
pub struct TransformContext<'a> {
    /// Meter that produced the samples
    pub meter: &'a str,
    /// Service the meter bills by default
    pub service: &'a str,
    /// Catalog used for profile resolution
    pub catalog: &'a dyn ServiceCatalog,
}

/// A metering strategy
pub trait Transformer: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Turn the samples for `window` into usage records
    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        samples: &[Sample],
        window: &TimeLabel,
    ) -> Result<Vec<UsageRecord>>;
}

/// Null-safe reduction over in-window values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Max,
    Sum,
}

impl Aggregation {
    pub fn apply<'a>(&self, values: impl IntoIterator<Item = &'a Sample>) -> Decimal {
        let values = values.into_iter().map(Sample::value_or_zero);
        match self {
            Aggregation::Max => values.max().unwrap_or(Decimal::ZERO),
            Aggregation::Sum => values.sum(),
        }
    }
}

/// Single record covering the whole window
pub(crate) fn window_record(ctx: &TransformContext<'_>, window: &TimeLabel, volume: Decimal) -> UsageRecord {
    let (start, end) = window.datetime_range();
    UsageRecord::new(ctx.service, start, end, volume)
}

/// How a meter is billed
#[derive(Clone)]
pub struct MeterBinding {
    pub transformer: Arc<dyn Transformer>,
    /// Default service for the meter's records
    pub service: ServiceId,
    pub unit: RateUnit,
}

/// Meter name to transformer mapping
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    meters: HashMap<String, MeterBinding>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a meter
    pub fn with_meter(
        mut self,
        meter: impl Into<String>,
        transformer: Arc<dyn Transformer>,
        service: impl Into<ServiceId>,
        unit: RateUnit,
    ) -> Self {
        self.meters.insert(
            meter.into(),
            MeterBinding {
                transformer,
                service: service.into(),
                unit,
            },
        );
        self
    }

    /// Bindings for a typical OpenStack telemetry deployment
    pub fn openstack() -> Self {
        Self::new()
            .with_meter("instance", Arc::new(Uptime::new()), "instance", RateUnit::Time)
            .with_meter("disk.size", Arc::new(FromImage::new()), "volume.image", RateUnit::Quantity)
            .with_meter("volume.size", Arc::new(GaugeMax), "volume.size", RateUnit::Quantity)
            .with_meter(
                "ip.floating",
                Arc::new(GaugeNetworkService::new(Aggregation::Max)),
                "ip.floating",
                RateUnit::Quantity,
            )
            .with_meter(
                "network.services.lb.pool",
                Arc::new(GaugeNetworkService::status_as_volume()),
                "network.lbaas",
                RateUnit::Quantity,
            )
            .with_meter(
                "network.outgoing.bytes",
                Arc::new(GaugeSum),
                "network.outgoing.bytes",
                RateUnit::Quantity,
            )
            .with_meter(
                "storage.objects.size",
                Arc::new(GaugeMax),
                "storage.objects.size",
                RateUnit::Quantity,
            )
    }

    pub fn get(&self, meter: &str) -> Result<&MeterBinding> {
        self.meters.get(meter).ok_or_else(|| {
            TelemetryError::UnknownMeter {
                meter: meter.to_string(),
            }
            .into()
        })
    }

    pub fn meters(&self) -> impl Iterator<Item = &str> {
        self.meters.keys().map(String::as_str)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_support::at;

    #[test]
    fn test_aggregation_null_safe() {
        let samples = vec![
            Sample::new(at(5, 0), Some(dec!(2))),
            Sample::new(at(5, 10), None),
            Sample::new(at(5, 20), Some(dec!(5))),
        ];

        assert_eq!(Aggregation::Max.apply(&samples), dec!(5));
        assert_eq!(Aggregation::Sum.apply(&samples), dec!(7));
        assert_eq!(Aggregation::Max.apply(&Vec::<Sample>::new()), Decimal::ZERO);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TransformerRegistry::openstack();
        let binding = registry.get("instance").unwrap();

        assert_eq!(binding.transformer.name(), "uptime");
        assert_eq!(binding.unit, RateUnit::Time);
        assert!(registry.get("cpu_util").is_err());
        assert!(registry.meters().count() >= 6);
    }
}
