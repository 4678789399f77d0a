//! Persistence for price samples.

pub mod price_store;

pub use price_store::{normalize_token, PriceStore, Sample, SampleRow};
