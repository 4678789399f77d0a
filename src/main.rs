//! Price Oracle - token prices keyed by block height or timestamp
//!
//! Serves `/update` (backfill-if-needed + live sample), `/gt` (nearest and
//! windowed lookups) and `/losses` (validator pass-through).

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::{path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use price_oracle::{
    api::{create_router, AppState},
    backfill::{BackfillOutcome, Backfiller},
    config::{OracleArgs, OracleConfig},
    providers::{
        ChainReader, CoinGeckoClient, CosmosChainClient, LossReporter, PriceProvider, Retrying,
    },
    query::QueryEngine,
    store::PriceStore,
    update::PriceUpdater,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let config = OracleConfig::from_args(OracleArgs::parse()).context("Invalid configuration")?;

    info!(
        token = %config.default_target.token_name,
        provider_id = %config.default_target.provider_id,
        axis = config.key_axis.as_str(),
        "🚀 Price oracle starting"
    );

    let store = PriceStore::open(&config.database_path, config.key_axis)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;
    info!("📊 Database initialized at: {}", config.database_path);

    let coingecko = CoinGeckoClient::new(
        &config.cg_api_url,
        config.cg_api_key.as_deref(),
        config.http_timeout,
    )
    .context("Failed to build CoinGecko client")?;
    let cosmos = CosmosChainClient::new(
        &config.validator_api_url,
        &config.losses_api_path,
        config.http_timeout,
    )
    .context("Failed to build validator client")?;

    let provider: Arc<dyn PriceProvider> =
        Arc::new(Retrying::new(coingecko, config.retry.clone()));
    let chain: Arc<dyn ChainReader> =
        Arc::new(Retrying::new(cosmos.clone(), config.retry.clone()));
    let losses: Arc<dyn LossReporter> = Arc::new(Retrying::new(cosmos, config.retry.clone()));

    let backfiller = Backfiller::new(
        store.clone(),
        provider.clone(),
        chain.clone(),
        config.block_interval_secs,
        config.history_days,
    );
    let updater = Arc::new(PriceUpdater::new(store.clone(), backfiller, provider, chain));

    // Initial backfill for the configured token; the server starts regardless.
    let target = config.default_target.clone();
    match updater
        .backfiller()
        .ensure_history(&target.token_name, &target.provider_id, &target.quote_currency)
        .await
    {
        Ok(BackfillOutcome::Loaded { inserted, dropped }) => {
            info!(inserted, dropped, "📥 Initial history loaded")
        }
        Ok(BackfillOutcome::AlreadyInitialized { existing }) => {
            info!(existing, "💾 Existing samples in database")
        }
        Err(e) => warn!("Error initializing token data: {}", e),
    }

    let state = AppState {
        updater,
        query: QueryEngine::new(store, config.block_interval_secs),
        losses,
        default_target: config.default_target.clone(),
        gt_format: config.gt_format,
    };
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.api_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "price_oracle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when running with --manifest-path from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
