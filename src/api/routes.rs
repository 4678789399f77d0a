use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::{
    config::{GtFormat, TokenTarget},
    error::{OracleError, OracleResult},
    middleware::request_logging_simple,
    providers::LossReporter,
    query::QueryEngine,
    store::Sample,
    update::PriceUpdater,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub updater: Arc<PriceUpdater>,
    pub query: QueryEngine,
    pub losses: Arc<dyn LossReporter>,
    pub default_target: TokenTarget,
    pub gt_format: GtFormat,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/update", get(update_default))
        .route("/update/:token/:provider_id/:quote", get(update_token))
        .route("/gt/:token/:key", get(ground_truth))
        .route("/gt/:token/:key/:offset", get(ground_truth_window))
        .route("/losses/:topic/:block_height", get(losses))
        .layer(middleware::from_fn(request_logging_simple))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> &'static str {
    "price oracle operational"
}

/// Backfill-if-needed plus one live sample for the configured token
async fn update_default(State(state): State<AppState>) -> OracleResult<Response> {
    let target = state.default_target.clone();
    run_update(
        &state,
        &target.token_name,
        &target.provider_id,
        &target.quote_currency,
    )
    .await
}

async fn update_token(
    State(state): State<AppState>,
    Path((token, provider_id, quote)): Path<(String, String, String)>,
) -> OracleResult<Response> {
    run_update(&state, &token, &provider_id, &quote).await
}

async fn run_update(
    state: &AppState,
    token: &str,
    provider_id: &str,
    quote: &str,
) -> OracleResult<Response> {
    let report = state.updater.update(token, provider_id, quote).await?;
    Ok(Json(report).into_response())
}

/// Nearest price at or before a key
async fn ground_truth(
    State(state): State<AppState>,
    Path((token, key)): Path<(String, String)>,
) -> OracleResult<Response> {
    let key = parse_i64("key", &key)?;
    let sample = state.query.sample_near(&token, key)?;
    Ok(render_sample(state.gt_format, sample))
}

/// Price `offset` minutes after the sample nearest to a key
async fn ground_truth_window(
    State(state): State<AppState>,
    Path((token, key, offset)): Path<(String, String, String)>,
) -> OracleResult<Response> {
    let key = parse_i64("key", &key)?;
    let offset = parse_i64("offset", &offset)?;
    let sample = state.query.sample_in_window(&token, key, offset)?;
    Ok(render_sample(state.gt_format, sample))
}

/// Pass-through to the validator's loss reporting
async fn losses(
    State(state): State<AppState>,
    Path((topic, block_height)): Path<(String, String)>,
) -> Result<Response, OracleError> {
    let block_height = parse_i64("block_height", &block_height)?;
    match state.losses.network_losses(&topic, block_height).await {
        Ok(body) => Ok(Json(body).into_response()),
        Err(e) if e.is_transient() => {
            warn!(topic = %topic, block_height, error = %e, "losses upstream failed");
            Ok((StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response())
        }
        Err(e) => Err(e),
    }
}

// ===== Helpers =====

fn parse_i64(name: &str, raw: &str) -> OracleResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| OracleError::InvalidInput(format!("{} must be an integer, got {:?}", name, raw)))
}

fn render_sample(format: GtFormat, sample: Sample) -> Response {
    match format {
        GtFormat::Json => Json(sample).into_response(),
        GtFormat::Text => Json(sample.price.to_string()).into_response(),
    }
}
