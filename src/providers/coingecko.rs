//! CoinGecko REST client
//!
//! Current price from `/simple/price`, trailing history from
//! `/coins/{id}/market_chart/range`.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{HistoricalPoint, PriceProvider};
use crate::error::{OracleError, OracleResult};

const CG_API_KEY_HEADER: &str = "x-cg-demo-api-key";

#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

/// `{"ethereum": {"usd": 2534.1}}`
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    #[serde(default)]
    prices: Vec<(f64, f64)>,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> OracleResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = api_key {
            headers.insert(
                CG_API_KEY_HEADER,
                key.parse::<reqwest::header::HeaderValue>()
                    .map_err(|_| OracleError::InvalidInput("invalid CoinGecko api key".into()))?,
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> OracleResult<T> {
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| OracleError::Provider(format!("GET {} failed: {}", url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OracleError::Provider(format!("GET {} {}: {}", url, status, text)));
        }

        resp.json::<T>()
            .await
            .map_err(|e| OracleError::Provider(format!("failed to parse {} response: {}", url, e)))
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoClient {
    async fn current_price(&self, provider_id: &str, quote_currency: &str) -> OracleResult<f64> {
        let id = provider_id.trim().to_lowercase();
        let quote = quote_currency.trim().to_lowercase();
        let prices: SimplePriceResponse = self
            .get_json(
                self.url("/simple/price"),
                &[("ids", id.clone()), ("vs_currencies", quote.clone())],
            )
            .await?;
        price_from_simple(&prices, &id, &quote)
    }

    async fn price_history(
        &self,
        provider_id: &str,
        quote_currency: &str,
        from: i64,
        to: i64,
    ) -> OracleResult<Vec<HistoricalPoint>> {
        let id = provider_id.trim().to_lowercase();
        let url = self.url(&format!("/coins/{}/market_chart/range", id));
        debug!(url = %url, from, to, "fetching historical prices");

        let chart: MarketChartResponse = self
            .get_json(
                url,
                &[
                    ("vs_currency", quote_currency.trim().to_lowercase()),
                    ("from", from.to_string()),
                    ("to", to.to_string()),
                ],
            )
            .await?;
        Ok(points_from_chart(chart))
    }
}

fn price_from_simple(prices: &SimplePriceResponse, id: &str, quote: &str) -> OracleResult<f64> {
    let by_quote = prices
        .get(id)
        .ok_or_else(|| OracleError::InvalidInput(format!("invalid token id: {}", id)))?;
    by_quote.get(quote).copied().ok_or_else(|| {
        OracleError::InvalidInput(format!("invalid quote currency {} for {}", quote, id))
    })
}

fn points_from_chart(chart: MarketChartResponse) -> Vec<HistoricalPoint> {
    chart
        .prices
        .into_iter()
        .filter(|(ts, price)| ts.is_finite() && price.is_finite())
        .map(|(ts, price)| HistoricalPoint {
            timestamp_ms: ts as i64,
            price,
        })
        .collect()
}
