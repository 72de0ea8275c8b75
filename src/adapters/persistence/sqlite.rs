//! SQLite Store - Durable Bar and Snapshot Tables
//!
//! Implements the `BarStore` and `SnapshotStore` ports on a single
//! SQLite database. Every upsert batch runs in one transaction with
//! `INSERT .. ON CONFLICT .. DO UPDATE`, so a composite key is never
//! duplicated and a failing batch leaves no partial rows behind.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text so rows sort
//! lexically and stay readable to external tools; the tables can be
//! inspected or truncated between runs without affecting in-memory
//! state.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags, Row, params, params_from_iter};
use tracing::{debug, info, instrument, warn};

use crate::domain::market::{
    Adjustment, Frequency, NormalizedBar, Snapshot, SnapshotStatus, TIMESTAMP_FORMAT,
    timestamp_format,
};
use crate::ports::store::{BarQuery, BarStore, SnapshotStore, StoreError, TableStats};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS bars (
    symbol TEXT NOT NULL,
    ts TEXT NOT NULL,
    frequency TEXT NOT NULL,
    source TEXT NOT NULL,
    adjustment TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL DEFAULT 0,
    amount REAL NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (symbol, ts, frequency, source, adjustment)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS snapshots (
    symbol TEXT NOT NULL,
    quote_time TEXT NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    last REAL NOT NULL DEFAULT 0,
    prev REAL NOT NULL DEFAULT 0,
    pct REAL NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (symbol, quote_time, source)
) WITHOUT ROWID;
";

const UPSERT_BAR_SQL: &str = "
INSERT INTO bars (symbol, ts, frequency, source, adjustment, open, high, low, close, volume, amount, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT(symbol, ts, frequency, source, adjustment) DO UPDATE SET
    open = excluded.open,
    high = excluded.high,
    low = excluded.low,
    close = excluded.close,
    volume = excluded.volume,
    amount = excluded.amount,
    updated_at = excluded.updated_at";

const UPSERT_SNAPSHOT_SQL: &str = "
INSERT INTO snapshots (symbol, quote_time, source, status, last, prev, pct, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(symbol, quote_time, source) DO UPDATE SET
    status = excluded.status,
    last = excluded.last,
    prev = excluded.prev,
    pct = excluded.pct,
    updated_at = excluded.updated_at";

/// SQLite-backed persistent store.
///
/// The connection is shared behind a mutex; SQLite serializes writers
/// anyway and every batch holds the lock for its whole transaction.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        let store = Self::init(conn)?;

        let stats = store.bar_stats()?;
        info!(
            path = %path.display(),
            bar_rows = stats.rows,
            "Persistent store opened"
        );
        Ok(store)
    }

    /// Private in-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // In-memory databases answer "memory" here.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(journal_mode = %mode, "SQLite pragmas applied");
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn table_stats(&self, table: &'static str) -> Result<TableStats, StoreError> {
        let conn = self.conn.lock();
        let (rows, latest): (i64, Option<i64>) = conn.query_row(
            &format!("SELECT COUNT(*), MAX(updated_at) FROM {table}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(TableStats {
            rows: u64::try_from(rows).unwrap_or_default(),
            latest_update: latest.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(table: &'static str, raw: &str) -> Result<NaiveDateTime, StoreError> {
    timestamp_format::parse(raw).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("timestamp {raw:?}: {e}"),
    })
}

/// Map a failed batch statement, singling out uniqueness violations.
fn write_error(table: &'static str, err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::WriteConflict {
            table,
            detail: err.to_string(),
        },
        _ => StoreError::Sqlite(err),
    }
}

struct RawBar {
    symbol: String,
    ts: String,
    frequency: String,
    source: String,
    adjustment: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    amount: f64,
}

impl RawBar {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(0)?,
            ts: row.get(1)?,
            frequency: row.get(2)?,
            source: row.get(3)?,
            adjustment: row.get(4)?,
            open: row.get(5)?,
            high: row.get(6)?,
            low: row.get(7)?,
            close: row.get(8)?,
            volume: row.get(9)?,
            amount: row.get(10)?,
        })
    }

    fn into_bar(self) -> Result<NormalizedBar, StoreError> {
        let corrupt = |detail: String| StoreError::Corrupt {
            table: "bars",
            detail,
        };
        let frequency = Frequency::from_key(&self.frequency)
            .ok_or_else(|| corrupt(format!("frequency {:?}", self.frequency)))?;
        let adjustment = Adjustment::from_key(&self.adjustment)
            .ok_or_else(|| corrupt(format!("adjustment {:?}", self.adjustment)))?;
        Ok(NormalizedBar {
            timestamp: parse_ts("bars", &self.ts)?,
            symbol: self.symbol,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            amount: self.amount,
            source: self.source,
            frequency,
            adjustment,
        })
    }
}

impl BarStore for SqliteStore {
    #[instrument(skip(self), fields(symbol = %query.symbol))]
    fn bars(&self, query: &BarQuery) -> Result<Vec<NormalizedBar>, StoreError> {
        let mut sql = String::from(
            "SELECT symbol, ts, frequency, source, adjustment, open, high, low, close, volume, amount \
             FROM bars WHERE symbol = ? AND frequency = ? AND adjustment = ?",
        );
        let mut args: Vec<String> = vec![
            query.symbol.clone(),
            query.frequency.as_key(),
            query.adjustment.as_key().to_string(),
        ];
        if let Some(source) = &query.source {
            sql.push_str(" AND source = ?");
            args.push(source.clone());
        }
        if let Some(start) = &query.start {
            sql.push_str(" AND ts >= ?");
            args.push(format_ts(start));
        }
        if let Some(end) = &query.end {
            sql.push_str(" AND ts <= ?");
            args.push(format_ts(end));
        }
        sql.push_str(" ORDER BY ts ASC, source ASC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let raw: Vec<RawBar> = stmt
            .query_map(params_from_iter(args.iter()), RawBar::from_row)?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let bars = raw
            .into_iter()
            .map(RawBar::into_bar)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(rows = bars.len(), "Bars read from store");
        Ok(bars)
    }

    #[instrument(skip(self, bars), fields(rows = bars.len()))]
    fn upsert_bars(&self, bars: &[NormalizedBar]) -> Result<usize, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }
        let updated_at = Utc::now().timestamp_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_BAR_SQL)?;
            for bar in bars {
                stmt.execute(params![
                    bar.symbol,
                    format_ts(&bar.timestamp),
                    bar.frequency.as_key(),
                    bar.source,
                    bar.adjustment.as_key(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.amount,
                    updated_at,
                ])
                .map_err(|e| write_error("bars", e))?;
            }
        }
        tx.commit().map_err(|e| {
            warn!(error = %e, "Bar batch commit failed, rolled back");
            write_error("bars", e)
        })?;
        Ok(bars.len())
    }

    fn bar_stats(&self) -> Result<TableStats, StoreError> {
        self.table_stats("bars")
    }
}

impl SnapshotStore for SqliteStore {
    fn latest_snapshots(&self, symbols: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; symbols.len()].join(",");
        let sql = format!(
            "SELECT s.symbol, s.quote_time, s.source, s.status, s.last, s.prev, s.pct \
             FROM snapshots s \
             INNER JOIN ( \
                 SELECT symbol, MAX(quote_time) AS max_qt FROM snapshots \
                 WHERE symbol IN ({placeholders}) GROUP BY symbol \
             ) t ON s.symbol = t.symbol AND s.quote_time = t.max_qt \
             ORDER BY s.symbol ASC, s.updated_at DESC, s.source ASC"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<(String, String, String, String, f64, f64, f64)> = stmt
            .query_map(params_from_iter(symbols.iter()), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let mut out: Vec<Snapshot> = Vec::with_capacity(raw.len());
        for (symbol, quote_time, source, status, last, prev, pct) in raw {
            // Several sources may share the newest quote_time; keep the
            // most recently written one, then the first source by name.
            if out.last().is_some_and(|prev_row| prev_row.symbol == symbol) {
                continue;
            }
            let status = match status.as_str() {
                "ok" => SnapshotStatus::Ok,
                _ => SnapshotStatus::Error,
            };
            out.push(Snapshot {
                quote_time: parse_ts("snapshots", &quote_time)?,
                symbol,
                last,
                prev,
                pct,
                source,
                status,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    fn upsert_snapshots(&self, rows: &[Snapshot]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let updated_at = Utc::now().timestamp_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SNAPSHOT_SQL)?;
            for row in rows {
                stmt.execute(params![
                    row.symbol,
                    format_ts(&row.quote_time),
                    row.source,
                    row.status.as_str(),
                    row.last,
                    row.prev,
                    row.pct,
                    updated_at,
                ])
                .map_err(|e| write_error("snapshots", e))?;
            }
        }
        tx.commit().map_err(|e| write_error("snapshots", e))?;
        Ok(rows.len())
    }

    fn snapshot_stats(&self) -> Result<TableStats, StoreError> {
        self.table_stats("snapshots")
    }
}
