//! PnL result persistence
//!
//! `ResultSink` is the boundary the aggregation engine writes through;
//! `PnlStore` is the SQLite-backed implementation, which also serves
//! the read side of the API. Persistence is best-effort by contract:
//! the engine never retries a failed store and never blocks event
//! processing on one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

use crate::types::PnlResult;

/// Persist one computed result.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, result: &PnlResult) -> Result<()>;
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS pnl_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    buy_price REAL NOT NULL,
    sell_price REAL NOT NULL,
    buy_volume REAL NOT NULL,
    sell_volume REAL NOT NULL,
    pnl REAL NOT NULL,
    computed_at TEXT NOT NULL
);

-- "Most recent N" retrieval plus sorting by period bounds and pnl
CREATE INDEX IF NOT EXISTS idx_pnl_computed_at ON pnl_results(computed_at DESC);
CREATE INDEX IF NOT EXISTS idx_pnl_period_start ON pnl_results(period_start DESC);
CREATE INDEX IF NOT EXISTS idx_pnl_period_end ON pnl_results(period_end DESC);
CREATE INDEX IF NOT EXISTS idx_pnl_value ON pnl_results(pnl DESC);
"#;

/// SQLite-backed result store. A single connection behind a mutex is
/// plenty here: writes arrive one at a time from the sequential
/// consumer, reads are small indexed queries.
pub struct PnlStore {
    conn: Mutex<Connection>,
}

impl PnlStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        let store = Self::from_connection(conn)?;

        info!(
            "Result store ready at {} ({} existing results)",
            db_path,
            store.count().unwrap_or(0)
        );
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize result store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent results, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<PnlResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT period_start, period_end, buy_price, sell_price,
                    buy_volume, sell_volume, pnl, computed_at
             FROM pnl_results
             ORDER BY computed_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (start, end, buy_price, sell_price, buy_volume, sell_volume, pnl, computed_at) =
                row?;
            results.push(PnlResult {
                period_start: parse_stored_instant(&start)?,
                period_end: parse_stored_instant(&end)?,
                buy_price,
                sell_price,
                buy_volume,
                sell_volume,
                pnl,
                computed_at: parse_stored_instant(&computed_at)?,
            });
        }
        Ok(results)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM pnl_results", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl ResultSink for PnlStore {
    async fn store(&self, result: &PnlResult) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pnl_results
             (period_start, period_end, buy_price, sell_price,
              buy_volume, sell_volume, pnl, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                encode_instant(result.period_start),
                encode_instant(result.period_end),
                result.buy_price,
                result.sell_price,
                result.buy_volume,
                result.sell_volume,
                result.pnl,
                encode_instant(result.computed_at),
            ],
        )
        .context("Failed to insert PnL result")?;
        Ok(())
    }
}

// Fixed-width RFC 3339 so lexicographic order matches time order.
fn encode_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stored_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Corrupt timestamp in result store: {:?}", raw))
}
