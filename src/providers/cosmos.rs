//! Validator node REST client: latest block height and network losses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ChainReader, LossReporter};
use crate::error::{OracleError, OracleResult};

const LATEST_BLOCK_PATH: &str = "cosmos/base/tendermint/v1beta1/blocks/latest";

#[derive(Clone)]
pub struct CosmosChainClient {
    client: Client,
    /// Always ends with '/'.
    base_url: String,
    losses_path: String,
}

impl CosmosChainClient {
    pub fn new(base_url: &str, losses_path: &str, timeout: Duration) -> OracleResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Ok(Self {
            client,
            base_url,
            losses_path: losses_path.trim_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("GET {} {}: {}", url, status, text));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| format!("failed to parse {} response: {}", url, e))
    }
}

#[async_trait]
impl ChainReader for CosmosChainClient {
    async fn latest_block_height(&self) -> OracleResult<i64> {
        let url = format!("{}{}", self.base_url, LATEST_BLOCK_PATH);
        debug!(url = %url, "fetching latest network block");
        let body = self.get_json(&url).await.map_err(OracleError::Chain)?;
        height_from_block(&body)
    }
}

#[async_trait]
impl LossReporter for CosmosChainClient {
    async fn network_losses(&self, topic: &str, block_height: i64) -> OracleResult<Value> {
        let url = format!(
            "{}{}/{}/{}",
            self.base_url, self.losses_path, topic, block_height
        );
        debug!(url = %url, "fetching network losses");
        self.get_json(&url).await.map_err(OracleError::Chain)
    }
}

/// `block.header.height` as string or number; a top-level array uses its
/// first element. Missing or non-positive heights are chain errors.
fn height_from_block(body: &Value) -> OracleResult<i64> {
    let block = match body {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| OracleError::Chain("empty block response".into()))?,
        other => other,
    };

    let raw = block
        .pointer("/block/header/height")
        .ok_or_else(|| OracleError::Chain("missing block.header.height".into()))?;

    let height = match raw {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
    .ok_or_else(|| OracleError::Chain(format!("unparseable block height: {}", raw)))?;

    if height < 1 {
        return Err(OracleError::Chain(format!("invalid block height {}", height)));
    }
    Ok(height)
}
