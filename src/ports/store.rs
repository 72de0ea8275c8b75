//! Store Port - Durable Time-series Persistence Interface
//!
//! The cold-path source of truth for bars and snapshots. Rows are
//! keyed by a composite key and written by upsert only, so a key is
//! never stored twice. Stores never call out to adapters.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::market::{Adjustment, Frequency, NormalizedBar, Snapshot};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// An upsert hit a uniqueness violation it could not resolve. The
  /// whole batch was rolled back.
  #[error("write conflict on {table}: {detail}")]
  WriteConflict { table: &'static str, detail: String },

  #[error("corrupt row in {table}: {detail}")]
  Corrupt { table: &'static str, detail: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Row count and freshness of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
  pub rows: u64,
  pub latest_update: Option<DateTime<Utc>>,
}

/// Range read over bars. `None` fields are unconstrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarQuery {
  pub symbol: String,
  pub frequency: Frequency,
  pub adjustment: Adjustment,
  pub source: Option<String>,
  pub start: Option<NaiveDateTime>,
  pub end: Option<NaiveDateTime>,
}

impl BarQuery {
  /// All sources, no time window.
  pub fn new(symbol: impl Into<String>, frequency: Frequency, adjustment: Adjustment) -> Self {
    Self {
      symbol: symbol.into(),
      frequency,
      adjustment,
      source: None,
      start: None,
      end: None,
    }
  }

  #[must_use]
  pub fn between(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
    self.start = Some(start);
    self.end = Some(end);
    self
  }

  #[must_use]
  pub fn from_source(mut self, source: impl Into<String>) -> Self {
    self.source = Some(source.into());
    self
  }
}

/// Bar persistence keyed by `(symbol, timestamp, frequency, source, adjustment)`.
pub trait BarStore: Send + Sync + 'static {
  /// Matching rows ordered by timestamp ascending.
  fn bars(&self, query: &BarQuery) -> Result<Vec<NormalizedBar>, StoreError>;

  /// Insert new keys, overwrite OHLCV of existing ones. Atomic per call.
  fn upsert_bars(&self, bars: &[NormalizedBar]) -> Result<usize, StoreError>;

  fn bar_stats(&self) -> Result<TableStats, StoreError>;
}

/// Snapshot persistence keyed by `(symbol, quote_time, source)`.
pub trait SnapshotStore: Send + Sync + 'static {
  /// Newest row per requested symbol, ordered by symbol.
  fn latest_snapshots(&self, symbols: &[String]) -> Result<Vec<Snapshot>, StoreError>;

  fn upsert_snapshots(&self, rows: &[Snapshot]) -> Result<usize, StoreError>;

  fn snapshot_stats(&self) -> Result<TableStats, StoreError>;
}
