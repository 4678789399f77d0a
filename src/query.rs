//! Nearest-match and windowed lookups over the price store.

use tracing::debug;

use crate::{
    aligner::Anchor,
    config::KeyAxis,
    error::{OracleError, OracleResult},
    store::{PriceStore, Sample},
};

#[derive(Clone)]
pub struct QueryEngine {
    store: PriceStore,
    block_interval_secs: i64,
}

impl QueryEngine {
    pub fn new(store: PriceStore, block_interval_secs: i64) -> Self {
        Self {
            store,
            block_interval_secs,
        }
    }

    pub fn axis(&self) -> KeyAxis {
        self.store.axis()
    }

    /// Nearest sample at or before `key`. Never falls back to a later sample.
    pub fn sample_near(&self, token: &str, key: i64) -> OracleResult<Sample> {
        self.store
            .nearest_at_or_before(token, key)?
            .ok_or_else(|| not_found(token, key))
    }

    pub fn price_near(&self, token: &str, key: i64) -> OracleResult<f64> {
        self.sample_near(token, key).map(|s| s.price)
    }

    /// Sample `offset_minutes` after the sample nearest to `reference_key`.
    pub fn sample_in_window(
        &self,
        token: &str,
        reference_key: i64,
        offset_minutes: i64,
    ) -> OracleResult<Sample> {
        if offset_minutes < 0 {
            return Err(OracleError::InvalidInput(format!(
                "offset must not be negative, got {}",
                offset_minutes
            )));
        }
        let reference = self.sample_near(token, reference_key)?;
        let offset_secs = offset_minutes
            .checked_mul(60)
            .ok_or_else(|| offset_out_of_range(offset_minutes))?;

        let found = match self.axis() {
            KeyAxis::BlockHeight => {
                // No stored timestamps: walk the offset forward in blocks.
                let reference_height = reference
                    .block_height
                    .ok_or_else(|| not_found(token, reference_key))?;
                let anchor = Anchor::new(reference_height, 0, self.block_interval_secs);
                let target_height = anchor.block_height_for_timestamp(offset_secs);
                debug!(token, reference_height, target_height, "windowed lookup by height");
                self.store.nearest_at_or_before(token, target_height)?
            }
            KeyAxis::Timestamp | KeyAxis::BlockHeightWithTimestamp => {
                let reference_timestamp = reference
                    .timestamp
                    .ok_or_else(|| not_found(token, reference_key))?;
                let target_timestamp = reference_timestamp
                    .checked_add(offset_secs)
                    .ok_or_else(|| offset_out_of_range(offset_minutes))?;
                debug!(token, reference_timestamp, target_timestamp, "windowed lookup by timestamp");
                self.store
                    .nearest_timestamp_at_or_before(token, target_timestamp)?
            }
        };

        found.ok_or_else(|| {
            OracleError::NotFound(format!(
                "no price for {} within {} minutes of {}",
                token, offset_minutes, reference_key
            ))
        })
    }

    pub fn price_in_window(
        &self,
        token: &str,
        reference_key: i64,
        offset_minutes: i64,
    ) -> OracleResult<f64> {
        self.sample_in_window(token, reference_key, offset_minutes)
            .map(|s| s.price)
    }
}

fn offset_out_of_range(offset_minutes: i64) -> OracleError {
    OracleError::InvalidInput(format!("offset of {} minutes is out of range", offset_minutes))
}

fn not_found(token: &str, key: i64) -> OracleError {
    OracleError::NotFound(format!(
        "no price data for {} at or before {}",
        token.trim().to_lowercase(),
        key
    ))
}
