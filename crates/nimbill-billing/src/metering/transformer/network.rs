//! Network service transformer
//!
//! Floating IPs, load balancers and VPN services report one sample per
//! poll. Allocation meters report a count; service pollsters report their
//! status as the value (0 inactive, 1 active, higher codes for pending or
//! error states), in which case only the active/inactive codes may bill.

use nimbill_common::{Result, Sample, TimeLabel, UsageRecord};
use rust_decimal::Decimal;
use tracing::debug;

use super::{window_record, Aggregation, TransformContext, Transformer};
use crate::metering::collector::split_window;

#[derive(Debug, Clone, Copy)]
pub struct GaugeNetworkService {
    aggregation: Aggregation,
    /// Values above this are status codes, not usage
    status_ceiling: Option<Decimal>,
}

impl GaugeNetworkService {
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            aggregation,
            status_ceiling: None,
        }
    }

    /// For pollsters that publish service status as the sample value
    pub fn status_as_volume() -> Self {
        Self {
            aggregation: Aggregation::Max,
            status_ceiling: Some(Decimal::ONE),
        }
    }
}

impl Transformer for GaugeNetworkService {
    fn name(&self) -> &'static str {
        "gauge_network_service"
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        samples: &[Sample],
        window: &TimeLabel,
    ) -> Result<Vec<UsageRecord>> {
        let split = split_window(samples, window);
        let counted = split.in_window.iter().copied().filter(|s| match self.status_ceiling {
            Some(ceiling) => s.value_or_zero() <= ceiling,
            None => true,
        });
        let volume = self.aggregation.apply(counted);

        debug!(meter = ctx.meter, %window, %volume, "Network service window");
        Ok(vec![window_record(ctx, window, volume)])
    }
}
