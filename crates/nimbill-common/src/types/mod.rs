//! Core data types for Nimbill

pub mod sample;
pub mod tariff;
pub mod time_label;
pub mod usage;
