//! Price Oracle Library
//!
//! Token prices persisted against block height or wall-clock time, with
//! nearest-match lookups across either axis.
//! Exposes core modules for use by binaries and tests.

pub mod aligner;
pub mod api;
pub mod backfill;
pub mod config;
pub mod error;
pub mod middleware;
pub mod providers;
pub mod query;
pub mod store;
pub mod update;

pub use error::{OracleError, OracleResult};
