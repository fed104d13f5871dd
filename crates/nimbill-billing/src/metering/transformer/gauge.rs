//! Gauge transformers
//!
//! One record per window. A resource that reported nothing still yields a
//! zero-volume record so it keeps appearing on the bill.

use nimbill_common::{Result, Sample, TimeLabel, UsageRecord};
use tracing::debug;

use super::{window_record, Aggregation, TransformContext, Transformer};
use crate::metering::collector::split_window;

/// Largest in-window value
#[derive(Debug, Clone, Copy, Default)]
pub struct GaugeMax;

/// Sum of in-window values
#[derive(Debug, Clone, Copy, Default)]
pub struct GaugeSum;

fn aggregate_window(
    aggregation: Aggregation,
    ctx: &TransformContext<'_>,
    samples: &[Sample],
    window: &TimeLabel,
) -> Vec<UsageRecord> {
    let split = split_window(samples, window);
    let volume = aggregation.apply(split.in_window.iter().copied());
    debug!(meter = ctx.meter, %window, samples = split.in_window.len(), %volume, "Gauge window");
    vec![window_record(ctx, window, volume)]
}

impl Transformer for GaugeMax {
    fn name(&self) -> &'static str {
        "gauge_max"
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        samples: &[Sample],
        window: &TimeLabel,
    ) -> Result<Vec<UsageRecord>> {
        Ok(aggregate_window(Aggregation::Max, ctx, samples, window))
    }
}

impl Transformer for GaugeSum {
    fn name(&self) -> &'static str {
        "gauge_sum"
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        samples: &[Sample],
        window: &TimeLabel,
    ) -> Result<Vec<UsageRecord>> {
        Ok(aggregate_window(Aggregation::Sum, ctx, samples, window))
    }
}
