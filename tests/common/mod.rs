//! In-process stand-ins for the upstream collaborators.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use price_oracle::{
    backfill::Backfiller,
    config::KeyAxis,
    error::{OracleError, OracleResult},
    providers::{ChainReader, HistoricalPoint, LossReporter, PriceProvider},
    store::PriceStore,
    update::PriceUpdater,
};

pub const BLOCK_INTERVAL_SECS: i64 = 5;

pub struct FakeProvider {
    pub known_id: String,
    pub price: Mutex<f64>,
    pub history: Mutex<Vec<HistoricalPoint>>,
    pub fail_history: Mutex<bool>,
    pub history_calls: AtomicUsize,
    pub price_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(known_id: &str, price: f64) -> Self {
        Self {
            known_id: known_id.to_string(),
            price: Mutex::new(price),
            history: Mutex::new(Vec::new()),
            fail_history: Mutex::new(false),
            history_calls: AtomicUsize::new(0),
            price_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_history(self, points: Vec<HistoricalPoint>) -> Self {
        *self.history.lock() = points;
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceProvider for FakeProvider {
    async fn current_price(&self, provider_id: &str, _quote_currency: &str) -> OracleResult<f64> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if provider_id != self.known_id {
            return Err(OracleError::InvalidInput(format!(
                "invalid token id: {}",
                provider_id
            )));
        }
        Ok(*self.price.lock())
    }

    async fn price_history(
        &self,
        provider_id: &str,
        _quote_currency: &str,
        _from: i64,
        _to: i64,
    ) -> OracleResult<Vec<HistoricalPoint>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_history.lock() {
            return Err(OracleError::Provider("history unavailable".into()));
        }
        if provider_id != self.known_id {
            return Err(OracleError::InvalidInput(format!(
                "invalid token id: {}",
                provider_id
            )));
        }
        Ok(self.history.lock().clone())
    }
}

pub struct FakeChain {
    pub height: Mutex<Option<i64>>,
}

impl FakeChain {
    pub fn at(height: i64) -> Self {
        Self {
            height: Mutex::new(Some(height)),
        }
    }

    pub fn down() -> Self {
        Self {
            height: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn latest_block_height(&self) -> OracleResult<i64> {
        self.height
            .lock()
            .ok_or_else(|| OracleError::Chain("connection refused".into()))
    }
}

pub struct FakeLosses {
    pub up: bool,
}

#[async_trait]
impl LossReporter for FakeLosses {
    async fn network_losses(&self, topic: &str, block_height: i64) -> OracleResult<Value> {
        if !self.up {
            return Err(OracleError::Chain("validator unreachable".into()));
        }
        Ok(json!({ "topic": topic, "block_height": block_height, "loss": "0.25" }))
    }
}

pub struct Harness {
    pub store: PriceStore,
    pub provider: Arc<FakeProvider>,
    pub chain: Arc<FakeChain>,
    pub updater: Arc<PriceUpdater>,
    _db: NamedTempFile,
}

pub fn harness(axis: KeyAxis, provider: FakeProvider, chain: FakeChain) -> Harness {
    let db = NamedTempFile::new().unwrap();
    let store = PriceStore::open(db.path().to_str().unwrap(), axis).unwrap();
    let provider = Arc::new(provider);
    let chain = Arc::new(chain);

    let backfiller = Backfiller::new(
        store.clone(),
        provider.clone(),
        chain.clone(),
        BLOCK_INTERVAL_SECS,
        30,
    );
    let updater = Arc::new(PriceUpdater::new(
        store.clone(),
        backfiller,
        provider.clone(),
        chain.clone(),
    ));

    Harness {
        store,
        provider,
        chain,
        updater,
        _db: db,
    }
}

/// History points `secs_ago` seconds before `now`.
pub fn history_before(now: i64, points: &[(i64, f64)]) -> Vec<HistoricalPoint> {
    points
        .iter()
        .map(|(secs_ago, price)| HistoricalPoint {
            timestamp_ms: (now - secs_ago) * 1000,
            price: *price,
        })
        .collect()
}
