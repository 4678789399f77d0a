//! Upstream collaborators: market data, chain height, network losses.

pub mod coingecko;
pub mod cosmos;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::OracleResult;

pub use coingecko::CoinGeckoClient;
pub use cosmos::CosmosChainClient;
pub use retry::{RetryPolicy, Retrying};

/// One point of a provider's price history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalPoint {
    pub timestamp_ms: i64,
    pub price: f64,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Unknown `provider_id` or `quote_currency` is `InvalidInput`.
    async fn current_price(&self, provider_id: &str, quote_currency: &str) -> OracleResult<f64>;

    /// Points between `from` and `to` (seconds, inclusive), oldest first.
    async fn price_history(
        &self,
        provider_id: &str,
        quote_currency: &str,
        from: i64,
        to: i64,
    ) -> OracleResult<Vec<HistoricalPoint>>;
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn latest_block_height(&self) -> OracleResult<i64>;
}

/// Opaque pass-through to the validator's loss reporting.
#[async_trait]
pub trait LossReporter: Send + Sync {
    async fn network_losses(&self, topic: &str, block_height: i64) -> OracleResult<Value>;
}
