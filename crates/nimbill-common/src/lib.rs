//! # Nimbill Common
//!
//! Shared types and errors for the Nimbill metering and rating engine.
//!
//! ## Core Types
//!
//! - [`TimeLabel`]: fixed-width billing window anchored to the Unix epoch
//! - [`WeightSegments`]: weighted interval set used to reconcile telemetry coverage
//! - [`Sample`]: one telemetry observation
//! - [`UsageRecord`]: metered usage of a service over a time range
//! - [`TariffEntry`]/[`Tariff`]: price and quantization rate per service

pub mod error;
pub mod segments;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{NimbillError, PricingError, Result, SegmentError, TelemetryError};
pub use segments::{InRange, Segment, WeightSegments, DEFAULT_WEIGHT};
pub use types::{
    sample::Sample,
    tariff::{RateUnit, Tariff, TariffAssignment, TariffEntry},
    time_label::{TimeLabel, HOUR_SECS},
    usage::{ServiceId, UsageRecord},
};

/// Nimbill version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default merge tolerance, in seconds, for coverage intervals
pub const DEFAULT_DEVIATION_SECS: u64 = 1;

/// Default tariff applied when a customer has no assignment
pub const DEFAULT_TARIFF_ID: &str = "default";
