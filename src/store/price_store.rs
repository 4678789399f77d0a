//! SQLite-backed price sample storage
//!
//! - One table per key axis, primary key `(key, token)`
//! - `INSERT ... ON CONFLICT DO UPDATE` gives last-write-wins per key
//! - A single connection behind a mutex serializes writers
//! - `synchronous = FULL` so an upsert is durable once it returns

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::KeyAxis,
    error::{OracleError, OracleResult},
};

/// One observation of a token's price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub price: f64,
}

impl Sample {
    /// Value on the store's primary axis.
    pub fn key(&self, axis: KeyAxis) -> Option<i64> {
        if axis.uses_block_height() {
            self.block_height
        } else {
            self.timestamp
        }
    }
}

/// Row handed to `upsert_batch`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRow {
    pub key: i64,
    pub price: f64,
    pub timestamp: Option<i64>,
}

/// Trim and lower-case a token name. Empty names are rejected.
pub fn normalize_token(token: &str) -> OracleResult<String> {
    let token = token.trim().to_lowercase();
    if token.is_empty() {
        return Err(OracleError::InvalidInput("token must not be empty".into()));
    }
    Ok(token)
}

struct Layout {
    table: &'static str,
    key_column: &'static str,
}

fn layout(axis: KeyAxis) -> Layout {
    match axis {
        KeyAxis::BlockHeight => Layout {
            table: "prices",
            key_column: "block_height",
        },
        KeyAxis::Timestamp => Layout {
            table: "prices_by_timestamp",
            key_column: "timestamp",
        },
        KeyAxis::BlockHeightWithTimestamp => Layout {
            table: "prices_by_block_and_timestamp",
            key_column: "block_height",
        },
    }
}

fn schema_sql(axis: KeyAxis) -> String {
    let Layout { table, key_column } = layout(axis);
    let secondary = if axis == KeyAxis::BlockHeightWithTimestamp {
        "    timestamp INTEGER NOT NULL,\n"
    } else {
        ""
    };
    let mut sql = format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    {key_column} INTEGER NOT NULL,
    token TEXT NOT NULL,
{secondary}    price REAL NOT NULL,
    PRIMARY KEY ({key_column}, token)
);

CREATE INDEX IF NOT EXISTS idx_{table}_token_key
    ON {table}(token, {key_column} DESC);
"#
    );
    if axis == KeyAxis::BlockHeightWithTimestamp {
        sql.push_str(&format!(
            r#"
CREATE INDEX IF NOT EXISTS idx_{table}_token_timestamp
    ON {table}(token, timestamp DESC);
"#
        ));
    }
    sql
}

/// Durable, queryable repository of price samples.
#[derive(Clone)]
pub struct PriceStore {
    conn: Arc<Mutex<Connection>>,
    axis: KeyAxis,
}

impl PriceStore {
    pub fn open(db_path: &str, axis: KeyAxis) -> OracleResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)?;
        Self::with_connection(conn, axis)
    }

    pub fn open_in_memory(axis: KeyAxis) -> OracleResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, axis)
    }

    fn with_connection(conn: Connection, axis: KeyAxis) -> OracleResult<Self> {
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") && !journal_mode.eq_ignore_ascii_case("memory")
        {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }
        conn.pragma_update(None, "synchronous", "FULL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            axis,
        };
        store.ensure_schema()?;

        info!(
            axis = axis.as_str(),
            table = layout(axis).table,
            "📊 Price store ready"
        );
        Ok(store)
    }

    pub fn axis(&self) -> KeyAxis {
        self.axis
    }

    /// Idempotent; never touches existing rows.
    pub fn ensure_schema(&self) -> OracleResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&schema_sql(self.axis))?;
        Ok(())
    }

    /// Insert or replace the sample for `(token, key)`.
    ///
    /// `timestamp` is required in the augmented layout and ignored otherwise.
    pub fn upsert(
        &self,
        token: &str,
        key: i64,
        price: f64,
        timestamp: Option<i64>,
    ) -> OracleResult<()> {
        let token = normalize_token(token)?;
        let row = SampleRow {
            key,
            price,
            timestamp,
        };
        let conn = self.conn.lock();
        self.upsert_row(&conn, &token, &row)?;
        debug!(token = %token, key, price, "upserted sample");
        Ok(())
    }

    /// Upsert many rows in one transaction. Nothing is written on error.
    pub fn upsert_batch(&self, token: &str, rows: &[SampleRow]) -> OracleResult<usize> {
        let token = normalize_token(token)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for row in rows {
            self.upsert_row(&tx, &token, row)?;
        }
        tx.commit()?;

        debug!(token = %token, rows = rows.len(), "📦 Batch upserted samples");
        Ok(rows.len())
    }

    fn upsert_row(&self, conn: &Connection, token: &str, row: &SampleRow) -> OracleResult<()> {
        let Layout { table, key_column } = layout(self.axis);
        if self.axis == KeyAxis::BlockHeightWithTimestamp {
            let timestamp = row.timestamp.ok_or_else(|| {
                OracleError::InvalidInput(format!(
                    "timestamp required for {} layout",
                    self.axis.as_str()
                ))
            })?;
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT INTO {table} ({key_column}, token, timestamp, price)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT({key_column}, token) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    price = excluded.price"
            ))?;
            stmt.execute(params![row.key, token, timestamp, row.price])?;
        } else {
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT INTO {table} ({key_column}, token, price)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT({key_column}, token) DO UPDATE SET
                    price = excluded.price"
            ))?;
            stmt.execute(params![row.key, token, row.price])?;
        }
        Ok(())
    }

    pub fn count(&self, token: &str) -> OracleResult<i64> {
        let token = normalize_token(token)?;
        let table = layout(self.axis).table;
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE token = ?1"),
            params![token],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Closest sample with `sample.key <= key`. `None` when every stored key
    /// is larger, even though a sample after `key` might exist.
    pub fn nearest_at_or_before(&self, token: &str, key: i64) -> OracleResult<Option<Sample>> {
        let token = normalize_token(token)?;
        let Layout { table, key_column } = layout(self.axis);
        let conn = self.conn.lock();
        self.query_one(
            &conn,
            &format!(
                "SELECT {key_column}, price{extra} FROM {table}
                 WHERE token = ?1 AND {key_column} <= ?2
                 ORDER BY {key_column} DESC LIMIT 1",
                extra = self.timestamp_select()
            ),
            &token,
            key,
        )
    }

    /// Globally closest sample by absolute key distance. On a tie the sample
    /// at or below `key` wins.
    pub fn nearest_any(&self, token: &str, key: i64) -> OracleResult<Option<Sample>> {
        let token = normalize_token(token)?;
        let Layout { table, key_column } = layout(self.axis);
        let conn = self.conn.lock();
        let extra = self.timestamp_select();

        let below = self.query_one(
            &conn,
            &format!(
                "SELECT {key_column}, price{extra} FROM {table}
                 WHERE token = ?1 AND {key_column} <= ?2
                 ORDER BY {key_column} DESC LIMIT 1"
            ),
            &token,
            key,
        )?;
        let above = self.query_one(
            &conn,
            &format!(
                "SELECT {key_column}, price{extra} FROM {table}
                 WHERE token = ?1 AND {key_column} > ?2
                 ORDER BY {key_column} ASC LIMIT 1"
            ),
            &token,
            key,
        )?;

        let axis = self.axis;
        let distance = |s: &Sample| s.key(axis).map(|k| k.abs_diff(key));
        Ok(match (below, above) {
            (Some(b), Some(a)) => {
                if distance(&a) < distance(&b) {
                    Some(a)
                } else {
                    Some(b)
                }
            }
            (b, a) => b.or(a),
        })
    }

    /// Sample with the greatest stored timestamp `<= timestamp`.
    pub fn nearest_timestamp_at_or_before(
        &self,
        token: &str,
        timestamp: i64,
    ) -> OracleResult<Option<Sample>> {
        if !self.axis.stores_timestamp() {
            return Err(OracleError::InvalidInput(format!(
                "{} layout stores no timestamps",
                self.axis.as_str()
            )));
        }
        if self.axis == KeyAxis::Timestamp {
            return self.nearest_at_or_before(token, timestamp);
        }

        let token = normalize_token(token)?;
        let Layout { table, key_column } = layout(self.axis);
        let conn = self.conn.lock();
        self.query_one(
            &conn,
            &format!(
                "SELECT {key_column}, price, timestamp FROM {table}
                 WHERE token = ?1 AND timestamp <= ?2
                 ORDER BY timestamp DESC, {key_column} DESC LIMIT 1"
            ),
            &token,
            timestamp,
        )
    }

    fn timestamp_select(&self) -> &'static str {
        if self.axis == KeyAxis::BlockHeightWithTimestamp {
            ", timestamp"
        } else {
            ""
        }
    }

    fn query_one(
        &self,
        conn: &Connection,
        sql: &str,
        token: &str,
        key: i64,
    ) -> OracleResult<Option<Sample>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let sample = stmt
            .query_row(params![token, key], |row| self.sample_from_row(token, row))
            .optional()?;
        Ok(sample)
    }

    fn sample_from_row(&self, token: &str, row: &Row<'_>) -> rusqlite::Result<Sample> {
        let key: i64 = row.get(0)?;
        let price: f64 = row.get(1)?;
        let (block_height, timestamp) = match self.axis {
            KeyAxis::BlockHeight => (Some(key), None),
            KeyAxis::Timestamp => (None, Some(key)),
            KeyAxis::BlockHeightWithTimestamp => (Some(key), Some(row.get(2)?)),
        };
        Ok(Sample {
            token: token.to_string(),
            block_height,
            timestamp,
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn seeded(axis: KeyAxis) -> PriceStore {
        let store = PriceStore::open_in_memory(axis).unwrap();
        for (key, price) in [(100, 10.0), (200, 20.0), (300, 30.0)] {
            store.upsert("ETHUSD", key, price, Some(key * 10)).unwrap();
        }
        store
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let store = PriceStore::open_in_memory(KeyAxis::BlockHeight).unwrap();
        store.upsert("ethusd", 42, 1.0, None).unwrap();
        store.upsert("ethusd", 42, 2.0, None).unwrap();

        assert_eq!(store.count("ethusd").unwrap(), 1);
        let s = store.nearest_at_or_before("ethusd", 42).unwrap().unwrap();
        assert_eq!(s.price, 2.0);
    }

    #[test]
    fn test_tokens_are_normalized() {
        let store = seeded(KeyAxis::BlockHeight);
        assert_eq!(store.count(" EthUsd ").unwrap(), 3);
        assert_eq!(store.count("btcusd").unwrap(), 0);
        assert!(matches!(
            store.count("  "),
            Err(OracleError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_nearest_at_or_before() {
        let store = seeded(KeyAxis::BlockHeight);

        let s = store.nearest_at_or_before("ethusd", 250).unwrap().unwrap();
        assert_eq!(s.block_height, Some(200));
        assert_eq!(s.price, 20.0);
        assert_eq!(s.timestamp, None);

        let exact = store.nearest_at_or_before("ethusd", 300).unwrap().unwrap();
        assert_eq!(exact.price, 30.0);

        assert!(store.nearest_at_or_before("ethusd", 50).unwrap().is_none());
        assert!(store.nearest_at_or_before("btcusd", 250).unwrap().is_none());
    }

    #[test]
    fn test_nearest_at_or_before_never_exceeds_query() {
        let store = seeded(KeyAxis::Timestamp);
        for q in (0..400).step_by(7) {
            if let Some(s) = store.nearest_at_or_before("ethusd", q).unwrap() {
                assert!(s.timestamp.unwrap() <= q);
            }
        }
    }

    #[test]
    fn test_nearest_any() {
        let store = seeded(KeyAxis::BlockHeight);

        let s = store.nearest_any("ethusd", 50).unwrap().unwrap();
        assert_eq!(s.block_height, Some(100));

        let s = store.nearest_any("ethusd", 290).unwrap().unwrap();
        assert_eq!(s.block_height, Some(300));

        // Equidistant: the lower sample wins
        let s = store.nearest_any("ethusd", 150).unwrap().unwrap();
        assert_eq!(s.block_height, Some(100));

        assert!(store.nearest_any("btcusd", 150).unwrap().is_none());
    }

    #[test]
    fn test_nearest_any_extreme_keys() {
        let store = seeded(KeyAxis::Timestamp);
        store.upsert("ethusd", i64::MIN, 1.0, None).unwrap();
        store.upsert("ethusd", i64::MAX, 2.0, None).unwrap();

        let s = store.nearest_any("ethusd", i64::MIN + 1).unwrap().unwrap();
        assert_eq!(s.timestamp, Some(i64::MIN));
        let s = store.nearest_any("ethusd", i64::MAX - 1).unwrap().unwrap();
        assert_eq!(s.timestamp, Some(i64::MAX));
    }

    #[test]
    fn test_augmented_layout_keeps_timestamp() {
        let store = seeded(KeyAxis::BlockHeightWithTimestamp);

        let s = store.nearest_at_or_before("ethusd", 299).unwrap().unwrap();
        assert_eq!(s.block_height, Some(200));
        assert_eq!(s.timestamp, Some(2000));

        let s = store
            .nearest_timestamp_at_or_before("ethusd", 2999)
            .unwrap()
            .unwrap();
        assert_eq!(s.block_height, Some(200));

        assert!(matches!(
            store.upsert("ethusd", 400, 40.0, None),
            Err(OracleError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_timestamp_lookup_rejected_without_timestamps() {
        let store = seeded(KeyAxis::BlockHeight);
        assert!(store.nearest_timestamp_at_or_before("ethusd", 1).is_err());
    }

    #[test]
    fn test_batch_upsert() {
        let store = PriceStore::open_in_memory(KeyAxis::BlockHeight).unwrap();
        let rows = [
            SampleRow { key: 1, price: 1.0, timestamp: None },
            SampleRow { key: 2, price: 2.0, timestamp: None },
            SampleRow { key: 2, price: 2.5, timestamp: None },
        ];
        assert_eq!(store.upsert_batch("ethusd", &rows).unwrap(), 3);
        assert_eq!(store.count("ethusd").unwrap(), 2);
        assert_eq!(
            store.nearest_at_or_before("ethusd", 2).unwrap().unwrap().price,
            2.5
        );
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let store = PriceStore::open_in_memory(KeyAxis::BlockHeightWithTimestamp).unwrap();
        let rows = [
            SampleRow { key: 1, price: 1.0, timestamp: Some(10) },
            SampleRow { key: 2, price: 2.0, timestamp: None },
        ];
        assert!(store.upsert_batch("ethusd", &rows).is_err());
        assert_eq!(store.count("ethusd").unwrap(), 0);
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        {
            let store = PriceStore::open(db_path, KeyAxis::BlockHeight).unwrap();
            store.upsert("ethusd", 7, 70.0, None).unwrap();
            store.ensure_schema().unwrap();
            store.ensure_schema().unwrap();
        }

        let store = PriceStore::open(db_path, KeyAxis::BlockHeight).unwrap();
        assert_eq!(store.count("ethusd").unwrap(), 1);
    }
}
