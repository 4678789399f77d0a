//! Live update path: best-effort backfill, then one fresh sample.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    backfill::{BackfillOutcome, Backfiller},
    config::KeyAxis,
    error::OracleResult,
    providers::{ChainReader, PriceProvider},
    store::{normalize_token, PriceStore},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateReport {
    pub message: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub price: f64,
    pub count: i64,
}

pub struct PriceUpdater {
    store: PriceStore,
    backfiller: Backfiller,
    provider: Arc<dyn PriceProvider>,
    chain: Arc<dyn ChainReader>,
}

impl PriceUpdater {
    pub fn new(
        store: PriceStore,
        backfiller: Backfiller,
        provider: Arc<dyn PriceProvider>,
        chain: Arc<dyn ChainReader>,
    ) -> Self {
        Self {
            store,
            backfiller,
            provider,
            chain,
        }
    }

    pub fn backfiller(&self) -> &Backfiller {
        &self.backfiller
    }

    pub async fn update(
        &self,
        token_name: &str,
        provider_id: &str,
        quote_currency: &str,
    ) -> OracleResult<UpdateReport> {
        let token = normalize_token(token_name)?;

        // Backfill never blocks the live sample.
        match self
            .backfiller
            .ensure_history(&token, provider_id, quote_currency)
            .await
        {
            Ok(BackfillOutcome::Loaded { inserted, dropped }) => {
                info!(token = %token, inserted, dropped, "backfill completed before update")
            }
            Ok(BackfillOutcome::AlreadyInitialized { .. }) => {}
            Err(e) => warn!(token = %token, error = %e, "Initialization failed, continuing with update"),
        }

        let price = self
            .provider
            .current_price(provider_id, quote_currency)
            .await?;

        let now = Utc::now().timestamp();
        let (key, timestamp) = match self.store.axis() {
            KeyAxis::Timestamp => (now, Some(now)),
            KeyAxis::BlockHeight => (self.chain.latest_block_height().await?, None),
            KeyAxis::BlockHeightWithTimestamp => {
                (self.chain.latest_block_height().await?, Some(now))
            }
        };
        let block_height = self.store.axis().uses_block_height().then_some(key);

        self.store.upsert(&token, key, price, timestamp)?;
        let count = self.store.count(&token)?;

        info!(token = %token, key, price, count, "Inserted data point");
        Ok(UpdateReport {
            message: format!("{} price updated successfully, {}", token, count),
            token,
            block_height,
            timestamp,
            price,
            count,
        })
    }
}
