//! Block height <-> wall-clock conversion
//!
//! Linear model anchored at one known (height, timestamp) pair:
//!
//! ```text
//! timestamp    = ref_ts - (ref_height - height) * interval
//! block_height = ref_height - (ref_ts - timestamp) / interval   (truncated)
//! ```
//!
//! Block production is not perfectly periodic, so results are advisory. They
//! place historical prices on the chain axis; they never assert chain state.

/// One (height, timestamp, interval) triple captured for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub reference_height: i64,
    /// Seconds.
    pub reference_timestamp: i64,
    pub block_interval_secs: i64,
}

impl Anchor {
    /// `block_interval_secs` must be positive; configuration rejects anything
    /// else before an anchor is built.
    pub fn new(reference_height: i64, reference_timestamp: i64, block_interval_secs: i64) -> Self {
        debug_assert!(
            block_interval_secs > 0,
            "block interval must be positive, got {block_interval_secs}"
        );
        Self {
            reference_height,
            reference_timestamp,
            block_interval_secs,
        }
    }

    /// May return zero or a negative height for far-past timestamps; callers
    /// must treat those as "not on chain".
    #[inline]
    pub fn block_height_for_timestamp(&self, timestamp: i64) -> i64 {
        self.block_height_for_timestamp_ms(timestamp.saturating_mul(1000))
    }

    /// Millisecond variant, matching the provider's history resolution.
    pub fn block_height_for_timestamp_ms(&self, timestamp_ms: i64) -> i64 {
        let reference_ms = self.reference_timestamp.saturating_mul(1000);
        let elapsed_secs = reference_ms.saturating_sub(timestamp_ms) as f64 / 1000.0;
        let blocks = elapsed_secs / self.block_interval_secs as f64;
        (self.reference_height as f64 - blocks).trunc() as i64
    }

    #[inline]
    pub fn timestamp_for_block_height(&self, block_height: i64) -> i64 {
        self.reference_timestamp
            - (self.reference_height - block_height) * self.block_interval_secs
    }
}
