//! Metering module
//!
//! Turns raw telemetry into reconciled usage:
//! - SampleCollector: Orders and deduplicates sample streams
//! - Transformers: Convert samples into per-window usage records
//! - UsageReconciler: Merges records per resource so nothing bills twice
//! - SegmentCache: Persists reconciled coverage between runs

pub mod aggregator;
pub mod cache;
pub mod collector;
pub mod transformer;

pub use aggregator::{ReconcileKey, UsageReconciler};
pub use cache::{InMemorySegmentCache, SegmentCache, SegmentStore};
pub use collector::{split_window, CollectorMetrics, SampleCollector, WindowSamples};
pub use transformer::{
    Aggregation, MeterBinding, TransformContext, Transformer, TransformerRegistry,
};
