//! Telemetry sample collector
//!
//! Normalizes raw sample streams before they reach the transformers:
//! - Stable ordering by timestamp (sources may deliver out of order)
//! - Deduplication of re-delivered observations (last delivery wins)
//! - Window splitting into lead-in and in-window samples

use nimbill_common::{Sample, TimeLabel};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Collector metrics
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    pub samples_received: AtomicU64,
    pub samples_deduplicated: AtomicU64,
    pub streams_normalized: AtomicU64,
}

/// Sample stream normalizer
#[derive(Debug, Default)]
pub struct SampleCollector {
    metrics: CollectorMetrics,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort by timestamp and collapse duplicate timestamps, keeping the last delivered sample
    pub fn normalize(&self, mut samples: Vec<Sample>) -> Vec<Sample> {
        let received = samples.len();
        // Stable, so delivery order survives among equal timestamps
        samples.sort_by_key(|s| s.timestamp);

        let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
        for sample in samples {
            if let Some(last) = out.last_mut() {
                if last.timestamp == sample.timestamp {
                    *last = sample;
                    continue;
                }
            }
            out.push(sample);
        }

        let dropped = received - out.len();
        self.metrics
            .samples_received
            .fetch_add(received as u64, Ordering::Relaxed);
        self.metrics
            .samples_deduplicated
            .fetch_add(dropped as u64, Ordering::Relaxed);
        self.metrics.streams_normalized.fetch_add(1, Ordering::Relaxed);
        if dropped > 0 {
            debug!(received, dropped, "Deduplicated samples");
        }
        out
    }

    /// Get collector metrics
    pub fn metrics(&self) -> &CollectorMetrics {
        &self.metrics
    }
}

/// Samples relevant to one window
#[derive(Debug, Clone, Default)]
pub struct WindowSamples<'a> {
    /// Latest sample before the window start
    pub lead_in: Option<&'a Sample>,
    /// Samples inside `[start, end)`, ordered by timestamp
    pub in_window: Vec<&'a Sample>,
}

impl WindowSamples<'_> {
    pub fn is_empty(&self) -> bool {
        self.in_window.is_empty()
    }
}

/// Split a sample stream around `window`. Ordering of the input is not assumed.
pub fn split_window<'a>(samples: &'a [Sample], window: &TimeLabel) -> WindowSamples<'a> {
    let (start, _) = window.datetime_range();

    // max_by_key keeps the last of equal maxima, matching last-delivery-wins
    let lead_in = samples
        .iter()
        .filter(|s| s.timestamp < start)
        .max_by_key(|s| s.timestamp);

    let mut in_window: Vec<&Sample> = samples
        .iter()
        .filter(|s| window.contains(s.timestamp))
        .collect();
    in_window.sort_by_key(|s| s.timestamp);

    WindowSamples { lead_in, in_window }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_normalize_sorts_and_dedupes() {
        let collector = SampleCollector::new();
        let samples = vec![
            Sample::new(at(5, 30), Some(dec!(3))),
            Sample::new(at(5, 10), Some(dec!(1))),
            Sample::new(at(5, 30), Some(dec!(4))),
            Sample::new(at(5, 20), None),
        ];

        let out = collector.normalize(samples);
        let values: Vec<_> = out.iter().map(|s| s.value).collect();

        assert_eq!(values, vec![Some(dec!(1)), None, Some(dec!(4))]);
        assert_eq!(collector.metrics().samples_received.load(Ordering::Relaxed), 4);
        assert_eq!(collector.metrics().samples_deduplicated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_split_window() {
        let window = TimeLabel::hourly(at(5, 0));
        let samples = vec![
            Sample::new(at(4, 50), Some(dec!(1))),
            Sample::new(at(5, 40), Some(dec!(3))),
            Sample::new(at(4, 10), Some(dec!(0))),
            Sample::new(at(5, 0), Some(dec!(2))),
            Sample::new(at(6, 0), Some(dec!(9))),
        ];

        let split = split_window(&samples, &window);

        assert_eq!(split.lead_in.unwrap().timestamp, at(4, 50));
        let stamps: Vec<_> = split.in_window.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![at(5, 0), at(5, 40)]);
    }

    #[test]
    fn test_split_window_without_lead_in() {
        let window = TimeLabel::hourly(at(5, 0));
        let samples = vec![Sample::new(at(5, 15), None)];

        let split = split_window(&samples, &window);
        assert!(split.lead_in.is_none());
        assert!(!split.is_empty());
    }
}
