//! Pricing module
//!
//! Rates metered usage against tariffs:
//! - Service catalog with profile resolution and auto-provisioning
//! - Quantization of raw volume into billable units
//! - Per-tariff subtotals for customers whose tariff changed mid-period

pub mod catalog;
pub mod engine;

pub use catalog::{InMemoryCatalog, ServiceCatalog};
pub use engine::{Invoice, RatedUsage, RatingEngine, TariffSubtotal};
