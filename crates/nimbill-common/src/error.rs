//! Error types for Nimbill
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using NimbillError
pub type Result<T> = std::result::Result<T, NimbillError>;

/// Unified error type for Nimbill operations
#[derive(Debug, Error)]
pub enum NimbillError {
    // Interval bookkeeping errors
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    // Pricing and catalog errors
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    // Telemetry shape errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by [`crate::WeightSegments`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("Inverted range: end {end} is before start {start}")]
    InvertedRange { start: i64, end: i64 },
}

/// Pricing calculation and catalog errors
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Unknown profile: {profile}")]
    UnknownProfile { profile: String },

    #[error("Unknown tariff: {tariff}")]
    UnknownTariff { tariff: String },

    #[error("Invalid rate {rate} for service {service}: must be at least 1")]
    InvalidRate { service: String, rate: String },

    #[error("Pricing calculation overflow")]
    Overflow,
}

/// Telemetry routing errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("No transformer registered for meter: {meter}")]
    UnknownMeter { meter: String },
}

// Implement From for common external error types
impl From<serde_json::Error> for NimbillError {
    fn from(err: serde_json::Error) -> Self {
        NimbillError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for NimbillError {
    fn from(err: std::io::Error) -> Self {
        NimbillError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for NimbillError {
    fn from(err: anyhow::Error) -> Self {
        NimbillError::Internal(err.to_string())
    }
}
