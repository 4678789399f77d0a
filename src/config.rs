//! Service configuration
//!
//! Every setting can come from the command line or the environment (after
//! `.env` loading). `OracleArgs` is the raw parse; `OracleConfig` is the
//! validated form handed to each component at construction.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::{
    error::{OracleError, OracleResult},
    providers::retry::RetryPolicy,
};

/// Which time axis keys the price table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyAxis {
    #[value(name = "block_height")]
    BlockHeight,
    #[value(name = "timestamp")]
    Timestamp,
    /// Block height key plus a stored wall-clock timestamp per row.
    #[value(name = "block_height_with_timestamp")]
    BlockHeightWithTimestamp,
}

impl KeyAxis {
    pub fn uses_block_height(self) -> bool {
        matches!(self, Self::BlockHeight | Self::BlockHeightWithTimestamp)
    }

    pub fn stores_timestamp(self) -> bool {
        matches!(self, Self::Timestamp | Self::BlockHeightWithTimestamp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockHeight => "block_height",
            Self::Timestamp => "timestamp",
            Self::BlockHeightWithTimestamp => "block_height_with_timestamp",
        }
    }
}

/// Body shape of a ground-truth answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GtFormat {
    /// `{"block_height": .., "price": ..}`
    #[value(name = "json")]
    Json,
    /// `"2534.12"`
    #[value(name = "text")]
    Text,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "price-oracle")]
#[command(about = "Token price oracle keyed by block height or timestamp")]
pub struct OracleArgs {
    /// Token symbol, stored as `<TOKEN>USD` lower-cased
    #[arg(long, env = "TOKEN", default_value = "ETH")]
    pub token: String,

    /// Provider identifier of the default token (e.g. "ethereum")
    #[arg(long, env = "TOKEN_CG_ID", default_value = "ethereum")]
    pub token_cg_id: String,

    #[arg(long, env = "QUOTE_CURRENCY", default_value = "usd")]
    pub quote_currency: String,

    #[arg(long, env = "KEY_AXIS", value_enum, default_value = "block_height")]
    pub key_axis: KeyAxis,

    #[arg(long, env = "BLOCK_TIME_SECONDS", default_value = "5")]
    pub block_time_seconds: i64,

    #[arg(long, env = "DATABASE_PATH", default_value = "prices.db")]
    pub database_path: String,

    #[arg(long, env = "API_PORT", default_value = "5000")]
    pub api_port: u16,

    #[arg(
        long,
        env = "ALLORA_VALIDATOR_API_URL",
        default_value = "http://localhost:1317/"
    )]
    pub validator_api_url: String,

    /// Validator path serving network losses, below the validator URL
    #[arg(long, env = "LOSSES_API_PATH", default_value = "emissions/v1/network_loss")]
    pub losses_api_path: String,

    #[arg(long, env = "CG_API_URL", default_value = "https://api.coingecko.com/api/v3")]
    pub cg_api_url: String,

    #[arg(long, env = "CGC_API_KEY", default_value = "")]
    pub cg_api_key: String,

    /// Trailing window fetched the first time a token is seen
    #[arg(long, env = "HISTORY_DAYS", default_value = "30")]
    pub history_days: i64,

    #[arg(long, env = "GT_FORMAT", value_enum, default_value = "json")]
    pub gt_format: GtFormat,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "5")]
    pub retry_max_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "1000")]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "10000")]
    pub retry_max_delay_ms: u64,
}

/// Default token for `/update` without path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTarget {
    pub token_name: String,
    pub provider_id: String,
    pub quote_currency: String,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub default_target: TokenTarget,
    pub key_axis: KeyAxis,
    pub block_interval_secs: i64,
    pub database_path: String,
    pub api_port: u16,
    pub validator_api_url: String,
    pub losses_api_path: String,
    pub cg_api_url: String,
    pub cg_api_key: Option<String>,
    pub history_days: i64,
    pub gt_format: GtFormat,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl OracleConfig {
    pub fn from_args(args: OracleArgs) -> OracleResult<Self> {
        if args.block_time_seconds <= 0 {
            return Err(OracleError::InvalidInput(format!(
                "BLOCK_TIME_SECONDS must be positive, got {}",
                args.block_time_seconds
            )));
        }
        if args.history_days <= 0 {
            return Err(OracleError::InvalidInput(format!(
                "HISTORY_DAYS must be positive, got {}",
                args.history_days
            )));
        }
        if args.retry_max_attempts == 0 {
            return Err(OracleError::InvalidInput(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let token = args.token.trim();
        if token.is_empty() {
            return Err(OracleError::InvalidInput("TOKEN must not be empty".into()));
        }

        let cg_api_key = Some(args.cg_api_key.trim().to_string()).filter(|k| !k.is_empty());

        Ok(Self {
            default_target: TokenTarget {
                token_name: format!("{}USD", token),
                provider_id: args.token_cg_id.trim().to_string(),
                quote_currency: args.quote_currency.trim().to_string(),
            },
            key_axis: args.key_axis,
            block_interval_secs: args.block_time_seconds,
            database_path: args.database_path,
            api_port: args.api_port,
            validator_api_url: with_trailing_slash(&args.validator_api_url),
            losses_api_path: args.losses_api_path.trim_matches('/').to_string(),
            cg_api_url: args.cg_api_url.trim_end_matches('/').to_string(),
            cg_api_key,
            history_days: args.history_days,
            gt_format: args.gt_format,
            http_timeout: Duration::from_secs(args.http_timeout_secs.max(1)),
            retry: RetryPolicy {
                max_attempts: args.retry_max_attempts,
                base_delay: Duration::from_millis(args.retry_base_delay_ms),
                multiplier: 2.0,
                max_delay: Duration::from_millis(args.retry_max_delay_ms),
            },
        })
    }
}

fn with_trailing_slash(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}
