//! SQLite adapter serving both price history and universe timelines.
//!
//! Schema:
//! - `prices(symbol, date, open, high, low, close, volume)`
//! - `universe_members(universe_id, date, symbol)`, one row per membership

use crate::domain::error::PitraderError;
use crate::domain::ohlcv::{PricePoint, Symbol};
use crate::domain::universe::UniverseTimeline;
use crate::ports::data_port::DataPort;
use crate::ports::universe_port::UniverseTimelinePort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn db_err(e: r2d2::Error) -> PitraderError {
    PitraderError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> PitraderError {
    PitraderError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_date_column(raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            raw.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
    name: String,
}

impl SqliteAdapter {
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, PitraderError> {
        let name = format!("sqlite:{}", path.as_ref().display());
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool, name })
    }

    /// Single-connection in-memory database; every pooled connection would
    /// otherwise see its own empty database.
    pub fn in_memory() -> Result<Self, PitraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;

        Ok(Self {
            pool,
            name: "sqlite::memory:".to_string(),
        })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, PitraderError> {
        self.pool.get().map_err(db_err)
    }

    pub fn initialize_schema(&self) -> Result<(), PitraderError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS prices (
                    symbol TEXT NOT NULL,
                    date TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume INTEGER NOT NULL,
                    PRIMARY KEY (symbol, date)
                );
                CREATE TABLE IF NOT EXISTS universe_members (
                    universe_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    PRIMARY KEY (universe_id, date, symbol)
                );
                CREATE INDEX IF NOT EXISTS idx_universe_members_id ON universe_members(universe_id);",
            )
            .map_err(query_err)
    }

    pub fn insert_prices(&self, points: &[PricePoint]) -> Result<(), PitraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for p in points {
            tx.execute(
                "INSERT OR REPLACE INTO prices (symbol, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    p.symbol,
                    p.date.format(DATE_FORMAT).to_string(),
                    p.open,
                    p.high,
                    p.low,
                    p.close,
                    p.volume
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)
    }

    pub fn insert_snapshot(
        &self,
        universe_id: &str,
        date: NaiveDate,
        members: &[Symbol],
    ) -> Result<(), PitraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let date = date.format(DATE_FORMAT).to_string();

        for symbol in members {
            tx.execute(
                "INSERT OR IGNORE INTO universe_members (universe_id, date, symbol)
                 VALUES (?1, ?2, ?3)",
                params![universe_id, date, symbol],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)
    }

    /// First date, last date and row count for a symbol.
    pub fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, PitraderError> {
        let result: (Option<String>, Option<String>, i64) = self
            .conn()?
            .query_row(
                "SELECT MIN(date), MAX(date), COUNT(*) FROM prices WHERE symbol = ?1",
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min), Some(max), count) if count > 0 => Ok(Some((
                parse_date_column(min).map_err(query_err)?,
                parse_date_column(max).map_err(query_err)?,
                count as usize,
            ))),
            _ => Ok(None),
        }
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PitraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, date, open, high, low, close, volume
                 FROM prices
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![
                    symbol,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok(PricePoint {
                        symbol: row.get(0)?,
                        date: parse_date_column(row.get(1)?)?,
                        open: row.get(2)?,
                        high: row.get(3)?,
                        low: row.get(4)?,
                        close: row.get(5)?,
                        volume: row.get(6)?,
                    })
                },
            )
            .map_err(query_err)?;

        let points = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)?;
        if points.is_empty() {
            return Err(PitraderError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("no rows between {} and {}", start_date, end_date),
            });
        }
        debug!(symbol, rows = points.len(), "queried prices");
        Ok(points)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provider_version(&self) -> String {
        self.name.clone()
    }
}

impl UniverseTimelinePort for SqliteAdapter {
    fn get_timeline(&self, universe_id: &str) -> Result<UniverseTimeline, PitraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, symbol FROM universe_members
                 WHERE universe_id = ?1
                 ORDER BY date ASC, symbol ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![universe_id], |row| {
                Ok((parse_date_column(row.get(0)?)?, row.get::<_, String>(1)?))
            })
            .map_err(query_err)?;
        let memberships = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)?;

        if memberships.is_empty() {
            return Err(PitraderError::UnknownUniverse {
                universe_id: universe_id.to_string(),
            });
        }
        Ok(UniverseTimeline::from_memberships(universe_id, memberships))
    }
}
