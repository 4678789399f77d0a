//! One-shot history load for tokens seen for the first time.
//!
//! Known property: two concurrent first calls for the same token can both
//! observe an empty table and fetch the history twice. The duplicate rows
//! collapse through the per-key upsert, so the race costs an extra provider
//! fetch and nothing else.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::{
    aligner::Anchor,
    config::KeyAxis,
    error::OracleResult,
    providers::{ChainReader, HistoricalPoint, PriceProvider},
    store::{normalize_token, PriceStore, SampleRow},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// The token already had samples; nothing was fetched.
    AlreadyInitialized { existing: i64 },
    Loaded { inserted: usize, dropped: usize },
}

pub struct Backfiller {
    store: PriceStore,
    provider: Arc<dyn PriceProvider>,
    chain: Arc<dyn ChainReader>,
    block_interval_secs: i64,
    history_days: i64,
}

impl Backfiller {
    pub fn new(
        store: PriceStore,
        provider: Arc<dyn PriceProvider>,
        chain: Arc<dyn ChainReader>,
        block_interval_secs: i64,
        history_days: i64,
    ) -> Self {
        Self {
            store,
            provider,
            chain,
            block_interval_secs,
            history_days,
        }
    }

    pub async fn ensure_history(
        &self,
        token: &str,
        provider_id: &str,
        quote_currency: &str,
    ) -> OracleResult<BackfillOutcome> {
        self.ensure_history_at(token, provider_id, quote_currency, Utc::now().timestamp())
            .await
    }

    /// `ensure_history` with an explicit "now" (seconds).
    pub async fn ensure_history_at(
        &self,
        token: &str,
        provider_id: &str,
        quote_currency: &str,
        now: i64,
    ) -> OracleResult<BackfillOutcome> {
        let token = normalize_token(token)?;
        self.store.ensure_schema()?;

        let existing = self.store.count(&token)?;
        if existing > 0 {
            info!(token = %token, existing, "Data already exists, skipping backfill");
            return Ok(BackfillOutcome::AlreadyInitialized { existing });
        }

        let axis = self.store.axis();
        let anchor = if axis.uses_block_height() {
            let height = self.chain.latest_block_height().await?;
            Some(Anchor::new(height, now, self.block_interval_secs))
        } else {
            None
        };

        let from = now - ChronoDuration::days(self.history_days).num_seconds();
        info!(
            token = %token,
            provider_id,
            quote_currency,
            from,
            to = now,
            "📥 Fetching historical prices"
        );
        let points = self
            .provider
            .price_history(provider_id, quote_currency, from, now)
            .await?;

        let rows = rows_for_axis(axis, anchor.as_ref(), &points);
        let dropped = points.len() - rows.len();
        if dropped > 0 {
            warn!(token = %token, dropped, "historical points outside the chain range dropped");
        }

        let inserted = self.store.upsert_batch(&token, &rows)?;
        info!(token = %token, inserted, dropped, "✅ History initialized");
        Ok(BackfillOutcome::Loaded { inserted, dropped })
    }
}

/// Map provider points onto the store's key. On the block axis, heights below
/// 1 or above the anchor height are not real chain positions and are skipped.
fn rows_for_axis(
    axis: KeyAxis,
    anchor: Option<&Anchor>,
    points: &[HistoricalPoint],
) -> Vec<SampleRow> {
    points
        .iter()
        .filter_map(|p| {
            let timestamp = p.timestamp_ms / 1000;
            match (axis, anchor) {
                (KeyAxis::Timestamp, _) => Some(SampleRow {
                    key: timestamp,
                    price: p.price,
                    timestamp: None,
                }),
                (_, Some(anchor)) => {
                    let height = anchor.block_height_for_timestamp_ms(p.timestamp_ms);
                    if height < 1 || height > anchor.reference_height {
                        return None;
                    }
                    Some(SampleRow {
                        key: height,
                        price: p.price,
                        timestamp: Some(timestamp),
                    })
                }
                (_, None) => None,
            }
        })
        .collect()
}
